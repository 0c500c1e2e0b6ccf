//! Turn coordinator: wires the story tree, memory bank, plot-card index and
//! a chat provider into the director/writer turn pipeline, and exposes
//! undo/redo and branch navigation over the combined tree+game state.

pub mod error;

pub use error::{EngineError, Result};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::delta::{self, apply_ops, DeltaPair, Op};
use crate::memory_bank::MemoryBank;
use crate::plot_cards::PlotCardIndex;
use crate::providers::{ChatMessage, ChatProvider, ChatRequest};
use crate::story_tree::{Actor, StoryNode, StoryTree, Turn};
use crate::world_state::{self, PlotUpdate};

/// One undoable step in the engine's history: a move of `selected` from
/// `from_node_id` to `to_node_id`, carrying the tree delta (over the tree's
/// own document) and the game delta (over the `{state, plots}` world
/// document) that accompanied it. `apply` is the forward direction of the
/// action; undo reverts it, redo re-applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Init,
    Act,
    Select,
    Erase,
    Retry,
    Edit,
}

#[derive(Debug, Clone)]
pub struct EngineAction {
    pub kind: ActionKind,
    pub from_node_id: Option<Uuid>,
    pub to_node_id: Option<Uuid>,
    pub tree: Option<DeltaPair>,
    pub game: Option<DeltaPair>,
}

/// What a director pass produced: world-state deltas plus, for
/// `determine_action_result` calls, an outcome note meant to be folded into
/// the writer's context (it is not itself a delta).
#[derive(Debug, Default)]
struct DirectorOutput {
    deltas: Vec<DeltaPair>,
    notes: Vec<String>,
}

/// Parses a `plot_id` argument (a string-encoded uuid) out of a tool call.
fn parse_plot_id(args: &Value) -> Option<Uuid> {
    args.get("plot_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Coordinates the tree, memory bank, plot-card index and chat provider
/// through a turn. Holds the game's `{state, plots}` document directly
/// (unlike the memory bank and plot-card index, which mirror a vector
/// store, this document has no embeddings of its own).
pub struct Engine {
    config: EngineConfig,
    world_state: RwLock<Value>,
    tree: RwLock<StoryTree>,
    memory_bank: MemoryBank,
    plot_cards: PlotCardIndex,
    chat: Arc<dyn ChatProvider>,
    selected: RwLock<Option<Uuid>>,
    undo_stack: RwLock<Vec<EngineAction>>,
    redo_stack: RwLock<Vec<EngineAction>>,
    turn_counter: RwLock<u32>,
    busy: RwLock<bool>,
    poisoned: RwLock<bool>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        memory_bank: MemoryBank,
        plot_cards: PlotCardIndex,
        chat: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            config,
            world_state: RwLock::new(serde_json::json!({ "state": {}, "plots": [] })),
            tree: RwLock::new(StoryTree::new()),
            memory_bank,
            plot_cards,
            chat,
            selected: RwLock::new(None),
            undo_stack: RwLock::new(Vec::new()),
            redo_stack: RwLock::new(Vec::new()),
            turn_counter: RwLock::new(0),
            busy: RwLock::new(false),
            poisoned: RwLock::new(false),
        }
    }

    pub fn selected_node_id(&self) -> Option<Uuid> {
        *self.selected.read()
    }

    pub fn world_state(&self) -> Value {
        self.world_state.read().clone()
    }

    pub fn tree(&self) -> &RwLock<StoryTree> {
        &self.tree
    }

    fn check_not_poisoned(&self) -> Result<()> {
        if *self.poisoned.read() {
            return Err(EngineError::DeltaApplyFailed(
                "engine was poisoned by a prior failed delta application".to_string(),
            ));
        }
        Ok(())
    }

    fn poison(&self) {
        *self.poisoned.write() = true;
        tracing::error!(target: "ifengine::engine", "engine poisoned: a delta failed to apply");
    }

    fn begin_turn(&self) -> Result<()> {
        let mut busy = self.busy.write();
        if *busy {
            return Err(EngineError::TurnInFlight);
        }
        *busy = true;
        Ok(())
    }

    fn end_turn(&self) {
        *self.busy.write() = false;
    }

    fn push_action(&self, action: EngineAction) {
        self.undo_stack.write().push(action);
        self.redo_stack.write().clear();
    }

    fn apply_tree_ops(&self, ops: &[Op]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut doc = self.tree.read().serialize();
        if let Err(e) = apply_ops(&mut doc, ops) {
            self.poison();
            return Err(EngineError::DeltaApplyFailed(e.to_string()));
        }
        match StoryTree::deserialize(&doc) {
            Ok(t) => {
                *self.tree.write() = t;
                Ok(())
            }
            Err(e) => {
                self.poison();
                Err(EngineError::DeltaApplyFailed(e.to_string()))
            }
        }
    }

    fn apply_game_ops(&self, ops: &[Op]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut guard = self.world_state.write();
        if let Err(e) = apply_ops(&mut guard, ops) {
            drop(guard);
            self.poison();
            return Err(EngineError::DeltaApplyFailed(e.to_string()));
        }
        Ok(())
    }

    /// Creates the root node carrying the opening narration. Fails if the
    /// tree already has a root.
    pub fn init(&self, opening_text: String) -> Result<Uuid> {
        self.check_not_poisoned()?;
        let node = StoryNode {
            id: Uuid::new_v4(),
            parent_id: None,
            children_ids: Vec::new(),
            turn: Turn {
                actor: Actor::Writer,
                text: opening_text,
                director_thinking: None,
            },
            deltas: Vec::new(),
        };
        let id = node.id;
        let tree_delta = self.tree.write().add_node(node)?;
        *self.selected.write() = Some(id);
        self.push_action(EngineAction {
            kind: ActionKind::Init,
            from_node_id: None,
            to_node_id: Some(id),
            tree: Some(tree_delta),
            game: None,
        });
        Ok(id)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.config.provider_timeout_ms)
    }

    /// Asks the director for world-state/plot tool calls and turns each
    /// recognized one into a delta over the game document.
    /// `determine_action_result` produces no delta; its outcome is recorded
    /// as a note for the writer. Any other tool name is logged and skipped.
    async fn run_director(&self, system_prompt: String, current_turn: u32) -> Result<DirectorOutput> {
        let req = ChatRequest {
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: system_prompt,
            }],
            tool_names: vec![
                "patch_state".to_string(),
                "add_plot".to_string(),
                "update_plot".to_string(),
                "remove_plot".to_string(),
                "determine_action_result".to_string(),
            ],
            deadline: self.deadline(),
        };
        let resp = self
            .chat
            .chat(req)
            .await
            .map_err(|_| EngineError::ProviderTimeout)?;

        let mut out = DirectorOutput::default();
        for call in resp.tool_calls {
            match call.name.as_str() {
                "patch_state" => {
                    let Some(partial) = call.arguments.get("partial_state") else {
                        tracing::warn!(target: "ifengine::engine", "patch_state call missing partial_state argument");
                        continue;
                    };
                    let mut guard = self.world_state.write();
                    let delta = world_state::patch_state(&mut guard, partial);
                    drop(guard);
                    out.deltas.push(delta);
                }
                "add_plot" => {
                    let title = call.arguments.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
                    let description = call
                        .arguments
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let alignment = call.arguments.get("player_alignment").and_then(Value::as_f64).unwrap_or(0.0);
                    let mut guard = self.world_state.write();
                    let (_, delta) = world_state::add_plot(&mut guard, title, description, alignment, current_turn);
                    drop(guard);
                    out.deltas.push(delta);
                }
                "update_plot" => {
                    let Some(plot_id) = parse_plot_id(&call.arguments) else {
                        tracing::warn!(target: "ifengine::engine", "update_plot call missing plot_id");
                        continue;
                    };
                    let updates: PlotUpdate = call
                        .arguments
                        .get("updates")
                        .cloned()
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or_default();
                    let mut guard = self.world_state.write();
                    match world_state::update_plot(&mut guard, plot_id, updates) {
                        Ok(delta) => {
                            drop(guard);
                            out.deltas.push(delta);
                        }
                        Err(e) => {
                            drop(guard);
                            tracing::warn!(target: "ifengine::engine", error = %e, "update_plot failed, skipping");
                        }
                    }
                }
                "remove_plot" => {
                    let Some(plot_id) = parse_plot_id(&call.arguments) else {
                        tracing::warn!(target: "ifengine::engine", "remove_plot call missing plot_id");
                        continue;
                    };
                    let mut guard = self.world_state.write();
                    match world_state::remove_plot(&mut guard, plot_id) {
                        Ok(delta) => {
                            drop(guard);
                            out.deltas.push(delta);
                        }
                        Err(e) => {
                            drop(guard);
                            tracing::warn!(target: "ifengine::engine", error = %e, "remove_plot failed, skipping");
                        }
                    }
                }
                "determine_action_result" => {
                    let action = call.arguments.get("action_description").and_then(Value::as_str).unwrap_or_default();
                    let success = call.arguments.get("success").and_then(Value::as_bool).unwrap_or(false);
                    let outcome_note = call.arguments.get("outcome_note").and_then(Value::as_str).unwrap_or_default();
                    out.notes.push(format!(
                        "{action} -> {}: {outcome_note}",
                        if success { "success" } else { "failure" }
                    ));
                }
                other => {
                    tracing::warn!(target: "ifengine::engine", tool = other, "director called an unknown tool, ignoring");
                }
            }
        }
        Ok(out)
    }

    /// Runs one full player turn: director pre-pass, player node, writer
    /// reply, director post-pass, periodic memory generation, writer node.
    /// Returns the id of the newly created writer node.
    pub async fn act(&self, player_input: String) -> Result<Uuid> {
        self.begin_turn()?;
        let result = self.act_inner(player_input).await;
        self.end_turn();
        result
    }

    async fn act_inner(&self, player_input: String) -> Result<Uuid> {
        self.check_not_poisoned()?;
        let current = self.selected.read().ok_or(EngineError::NotInitialized)?;

        let recent = self
            .tree
            .read()
            .get_recent_turns(current, self.config.recent_turns_window)?;
        let transcript = recent
            .iter()
            .map(|t| format!("{:?}: {}", t.actor, t.text))
            .collect::<Vec<_>>()
            .join("\n");

        let turn_no = {
            let mut c = self.turn_counter.write();
            *c += 1;
            *c
        };

        let memories = self
            .memory_bank
            .search(&player_input, turn_no, self.config.memory_search_limit)
            .await?;
        let cards = self
            .plot_cards
            .search(&player_input, self.config.plot_card_search_limit)
            .await?;

        // 1-2. Director pre-pass reacts to the player's action.
        let pre_prompt = format!(
            "Recent scene:\n{transcript}\n\nPlayer: {player_input}\n\nRelevant memories: {}\nRelevant plot cards: {}\n\nUpdate world state if the player's action changed it.",
            memories.len(),
            cards.len()
        );
        let pre_output = self.run_director(pre_prompt, turn_no).await?;
        let pre_deltas = pre_output.deltas;
        for d in &pre_deltas {
            self.apply_game_ops(&d.apply)?;
        }
        let director_notes = pre_output.notes.join("\n");

        let player_node = StoryNode {
            id: Uuid::new_v4(),
            parent_id: Some(current),
            children_ids: Vec::new(),
            turn: Turn {
                actor: Actor::Player,
                text: player_input,
                director_thinking: None,
            },
            deltas: pre_deltas.clone(),
        };
        let player_id = player_node.id;
        let tree_delta_player = self.tree.write().add_node(player_node)?;

        // 5. Writer reply.
        let writer_content = if director_notes.is_empty() {
            format!("Continue the story.\n{transcript}")
        } else {
            format!("Continue the story.\n{transcript}\n\nAction outcomes:\n{director_notes}")
        };
        let writer_req = ChatRequest {
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: writer_content,
            }],
            tool_names: Vec::new(),
            deadline: self.deadline(),
        };
        let writer_resp = self
            .chat
            .chat_stream(writer_req)
            .await
            .map_err(|_| EngineError::ProviderTimeout)?;
        let writer_text = writer_resp.full_text();

        // 6. Director post-pass reacts to the writer's narration.
        let post_prompt = format!("Writer continued:\n{writer_text}\n\nUpdate world state if needed.");
        let post_output = self.run_director(post_prompt, turn_no).await?;
        let mut post_deltas = post_output.deltas;
        for d in &post_deltas {
            self.apply_game_ops(&d.apply)?;
        }

        // 7. Periodic memory generation.
        if turn_no % self.config.memory_generation_interval.max(1) == 0 {
            let turns_for_memory: Vec<(String, String)> = recent
                .iter()
                .map(|t| (format!("{:?}", t.actor), t.text.clone()))
                .chain(std::iter::once(("Writer".to_string(), writer_text.clone())))
                .collect();
            let (_, mem_delta) = self
                .memory_bank
                .generate_and_add_memory(&turns_for_memory, turn_no, self.chat.as_ref(), self.deadline())
                .await?;
            post_deltas.push(mem_delta);
        }

        let writer_node = StoryNode {
            id: Uuid::new_v4(),
            parent_id: Some(player_id),
            children_ids: Vec::new(),
            turn: Turn {
                actor: Actor::Writer,
                text: writer_text,
                director_thinking: None,
            },
            deltas: post_deltas.clone(),
        };
        let writer_id = writer_node.id;
        let tree_delta_writer = self.tree.write().add_node(writer_node)?;

        let combined_tree = delta::combine(&tree_delta_player, &tree_delta_writer);
        let combined_game = delta::combine(&delta::fold(&pre_deltas), &delta::fold(&post_deltas));

        *self.selected.write() = Some(writer_id);
        self.push_action(EngineAction {
            kind: ActionKind::Act,
            from_node_id: Some(current),
            to_node_id: Some(writer_id),
            tree: Some(combined_tree),
            game: Some(combined_game),
        });
        Ok(writer_id)
    }

    /// Pops the undo stack, reverting the action's game delta then its tree
    /// delta, and moves `selected` back to the action's origin.
    pub fn undo(&self) -> Result<Uuid> {
        self.check_not_poisoned()?;
        if *self.busy.read() {
            return Err(EngineError::TurnInFlight);
        }
        let action = self
            .undo_stack
            .write()
            .pop()
            .ok_or(EngineError::NothingToUndo)?;
        if let Some(game) = &action.game {
            self.apply_game_ops(&game.revert)?;
        }
        if let Some(tree) = &action.tree {
            self.apply_tree_ops(&tree.revert)?;
        }
        *self.selected.write() = action.from_node_id;
        let target = action.from_node_id.ok_or(EngineError::NotInitialized)?;
        self.redo_stack.write().push(action);
        Ok(target)
    }

    /// Pops the redo stack, re-applying the action's tree delta then its
    /// game delta, and moves `selected` forward to the action's target.
    pub fn redo(&self) -> Result<Uuid> {
        self.check_not_poisoned()?;
        if *self.busy.read() {
            return Err(EngineError::TurnInFlight);
        }
        let action = self
            .redo_stack
            .write()
            .pop()
            .ok_or(EngineError::NothingToRedo)?;
        if let Some(tree) = &action.tree {
            self.apply_tree_ops(&tree.apply)?;
        }
        if let Some(game) = &action.game {
            self.apply_game_ops(&game.apply)?;
        }
        *self.selected.write() = action.to_node_id;
        let target = action.to_node_id.ok_or(EngineError::NotInitialized)?;
        self.undo_stack.write().push(action);
        Ok(target)
    }

    /// Path-diff game deltas from the current node down to their lowest
    /// common ancestor with `target`, then forward up `target`'s path,
    /// replaying exactly the deltas needed to land on `target`'s state.
    pub async fn select(&self, target: Uuid) -> Result<()> {
        self.check_not_poisoned()?;
        if *self.busy.read() {
            return Err(EngineError::TurnInFlight);
        }
        let current = self.selected.read().ok_or(EngineError::NotInitialized)?;
        if current == target {
            return Ok(());
        }

        let (away_delta, toward_delta) = {
            let tree = self.tree.read();
            let lca = tree.lowest_common_ancestor(current, target)?;
            let path_cur = tree.get_path_to_node(current)?;
            let path_tgt = tree.get_path_to_node(target)?;
            let lca_idx_cur = path_cur.iter().position(|&n| n == lca).unwrap();
            let lca_idx_tgt = path_tgt.iter().position(|&n| n == lca).unwrap();

            let away: Vec<DeltaPair> = path_cur[lca_idx_cur + 1..]
                .iter()
                .rev()
                .map(|nid| delta::invert(&delta::fold(&tree.get_node(*nid).unwrap().deltas)))
                .collect();
            let toward: Vec<DeltaPair> = path_tgt[lca_idx_tgt + 1..]
                .iter()
                .map(|nid| delta::fold(&tree.get_node(*nid).unwrap().deltas))
                .collect();
            (delta::fold(&away), delta::fold(&toward))
        };

        let combined = delta::combine(&away_delta, &toward_delta);
        self.apply_game_ops(&combined.apply)?;
        *self.selected.write() = Some(target);
        self.push_action(EngineAction {
            kind: ActionKind::Select,
            from_node_id: Some(current),
            to_node_id: Some(target),
            tree: None,
            game: Some(combined),
        });
        Ok(())
    }

    /// Cycles the current node's selection among its siblings.
    pub async fn switch(&self, forward: bool) -> Result<Uuid> {
        let current = self.selected.read().ok_or(EngineError::NotInitialized)?;
        let (parent_id, siblings) = {
            let tree = self.tree.read();
            let node = tree.get_node(current).ok_or(crate::story_tree::TreeError::NotFound(current))?;
            let parent_id = node.parent_id;
            let siblings = match parent_id {
                Some(pid) => tree.get_node(pid).unwrap().children_ids.clone(),
                None => vec![current],
            };
            (parent_id, siblings)
        };
        let _ = parent_id;
        if siblings.len() <= 1 {
            return Ok(current);
        }
        let idx = siblings.iter().position(|&n| n == current).unwrap();
        let next_idx = if forward {
            (idx + 1) % siblings.len()
        } else {
            (idx + siblings.len() - 1) % siblings.len()
        };
        let target = siblings[next_idx];
        self.select(target).await?;
        Ok(target)
    }

    /// Time-travels to `id`'s parent and deletes `id`'s entire branch.
    /// Forbidden on the root.
    pub fn erase(&self, id: Uuid) -> Result<Uuid> {
        self.check_not_poisoned()?;
        if *self.busy.read() {
            return Err(EngineError::TurnInFlight);
        }
        let node = self
            .tree
            .read()
            .get_node(id)
            .cloned()
            .ok_or(crate::story_tree::TreeError::NotFound(id))?;
        let parent = node
            .parent_id
            .ok_or(crate::story_tree::TreeError::CannotDeleteRoot)?;

        let forward = delta::fold(&node.deltas);
        let away = delta::invert(&forward);
        self.apply_game_ops(&away.apply)?;

        let (_, tree_delta) = self.tree.write().delete_branch(id)?;
        *self.selected.write() = Some(parent);
        self.push_action(EngineAction {
            kind: ActionKind::Erase,
            from_node_id: Some(id),
            to_node_id: Some(parent),
            tree: Some(tree_delta),
            game: Some(DeltaPair {
                apply: away.apply,
                revert: forward.apply,
            }),
        });
        Ok(parent)
    }

    /// Discards a writer node's narration and re-runs the writer stage from
    /// its parent, producing a new sibling writer node.
    pub async fn retry(&self, id: Uuid) -> Result<Uuid> {
        self.begin_turn()?;
        let result = self.retry_inner(id).await;
        self.end_turn();
        result
    }

    async fn retry_inner(&self, id: Uuid) -> Result<Uuid> {
        self.check_not_poisoned()?;
        let node = self
            .tree
            .read()
            .get_node(id)
            .cloned()
            .ok_or(crate::story_tree::TreeError::NotFound(id))?;
        if node.turn.actor != Actor::Writer {
            return Err(EngineError::NotAWriterNode(id));
        }
        let parent = node
            .parent_id
            .ok_or(crate::story_tree::TreeError::CannotDeleteRoot)?;

        let away = delta::invert(&delta::fold(&node.deltas));
        self.apply_game_ops(&away.apply)?;

        let recent = self.tree.read().get_recent_turns(parent, self.config.recent_turns_window)?;
        let transcript = recent
            .iter()
            .map(|t| format!("{:?}: {}", t.actor, t.text))
            .collect::<Vec<_>>()
            .join("\n");
        let writer_req = ChatRequest {
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: format!("Continue the story differently this time.\n{transcript}"),
            }],
            tool_names: Vec::new(),
            deadline: self.deadline(),
        };
        let writer_resp = self
            .chat
            .chat_stream(writer_req)
            .await
            .map_err(|_| EngineError::ProviderTimeout)?;
        let writer_text = writer_resp.full_text();

        let post_prompt = format!("Writer continued:\n{writer_text}\n\nUpdate world state if needed.");
        let turn_no = *self.turn_counter.read();
        let post_deltas = self.run_director(post_prompt, turn_no).await?.deltas;
        for d in &post_deltas {
            self.apply_game_ops(&d.apply)?;
        }

        let new_node = StoryNode {
            id: Uuid::new_v4(),
            parent_id: Some(parent),
            children_ids: Vec::new(),
            turn: Turn {
                actor: Actor::Writer,
                text: writer_text,
                director_thinking: None,
            },
            deltas: post_deltas.clone(),
        };
        let new_id = new_node.id;
        let tree_delta = self.tree.write().add_node(new_node)?;

        let combined_game = delta::combine(&away, &delta::fold(&post_deltas));
        *self.selected.write() = Some(new_id);
        self.push_action(EngineAction {
            kind: ActionKind::Retry,
            from_node_id: Some(id),
            to_node_id: Some(new_id),
            tree: Some(tree_delta),
            game: Some(combined_game),
        });
        Ok(new_id)
    }

    /// Player nodes: replaces the turn text only. Writer nodes: replaces the
    /// text and re-runs the post-writer director assessment, reconciling
    /// the old assessment's game-state effects with the new one's.
    pub async fn edit(&self, id: Uuid, new_text: String) -> Result<()> {
        self.begin_turn()?;
        let result = self.edit_inner(id, new_text).await;
        self.end_turn();
        result
    }

    async fn edit_inner(&self, id: Uuid, new_text: String) -> Result<()> {
        self.check_not_poisoned()?;
        let node = self
            .tree
            .read()
            .get_node(id)
            .cloned()
            .ok_or(crate::story_tree::TreeError::NotFound(id))?;

        match node.turn.actor {
            Actor::Player => {
                let new_turn = Turn {
                    actor: Actor::Player,
                    text: new_text,
                    director_thinking: None,
                };
                let tree_delta = self.tree.write().edit_node(id, new_turn)?;
                self.push_action(EngineAction {
                    kind: ActionKind::Edit,
                    from_node_id: Some(id),
                    to_node_id: Some(id),
                    tree: Some(tree_delta),
                    game: None,
                });
                Ok(())
            }
            Actor::Writer => {
                let old_forward = delta::fold(&node.deltas);
                self.apply_game_ops(&delta::invert(&old_forward).apply)?;

                let post_prompt = format!(
                    "Writer narration was edited to:\n{new_text}\n\nUpdate world state if needed."
                );
                let turn_no = *self.turn_counter.read();
                let new_deltas = self.run_director(post_prompt, turn_no).await?.deltas;
                for d in &new_deltas {
                    self.apply_game_ops(&d.apply)?;
                }
                let new_forward = delta::fold(&new_deltas);

                let new_turn = Turn {
                    actor: Actor::Writer,
                    text: new_text,
                    director_thinking: None,
                };
                let tree_delta = self
                    .tree
                    .write()
                    .update_node(id, new_turn, new_deltas)?;

                let combined_game = DeltaPair {
                    apply: delta::combine(&delta::invert(&old_forward), &new_forward).apply,
                    revert: delta::combine(&delta::invert(&new_forward), &old_forward).apply,
                };
                self.push_action(EngineAction {
                    kind: ActionKind::Edit,
                    from_node_id: Some(id),
                    to_node_id: Some(id),
                    tree: Some(tree_delta),
                    game: Some(combined_game),
                });
                Ok(())
            }
        }
    }
}
