use std::sync::Arc;

use ifengine::config::{EngineConfig, StoreConfig, VectorFormat};
use ifengine::engine::Engine;
use ifengine::memory_bank::MemoryBank;
use ifengine::plot_cards::PlotCardIndex;
use ifengine::providers::test_support::{FakeEmbeddingProvider, ScriptedChatProvider};
use ifengine::providers::ChatResponse;
use ifengine::vector_store::Store;
use tempfile::tempdir;

fn build_engine(replies: Vec<ChatResponse>) -> Engine {
    let embedder = Arc::new(FakeEmbeddingProvider { dim: 8 });
    let mem_dir = tempdir().unwrap();
    let mem_store = Store::open(
        StoreConfig {
            dimension: 8,
            format: VectorFormat::Dense,
            ..Default::default()
        },
        mem_dir.path(),
        Vec::new(),
    )
    .unwrap();
    let plot_dir = tempdir().unwrap();
    let plot_store = Store::open(
        StoreConfig {
            dimension: 8,
            format: VectorFormat::Dense,
            ..Default::default()
        },
        plot_dir.path(),
        Vec::new(),
    )
    .unwrap();
    let memory_bank = MemoryBank::new(mem_store, embedder.clone());
    let plot_cards = PlotCardIndex::new(plot_store, embedder);
    let chat = Arc::new(ScriptedChatProvider::new(replies));
    Engine::new(EngineConfig::default(), memory_bank, plot_cards, chat)
}

fn patch_state_reply(key: &str, value: serde_json::Value) -> ChatResponse {
    ChatResponse {
        text: String::new(),
        tool_calls: vec![ifengine::providers::ToolCall {
            name: "patch_state".to_string(),
            arguments: serde_json::json!({ "patch": { key: value } }),
        }],
    }
}

fn empty_reply() -> ChatResponse {
    ChatResponse::default()
}

/// Scenario 4: `root -> P1 -> W1`, selection at W1; `erase(W1)` moves
/// selection to P1 with the tree containing only `{root, P1}` and world
/// state matching its value at P1; `undo()` then restores selection to
/// W1 with the tree containing `{root, P1, W1}` and world state matching
/// its value at W1.
#[tokio::test]
async fn erase_then_undo_restores_tree_and_world_state() {
    let engine = build_engine(vec![
        empty_reply(),
        ChatResponse {
            text: "The torch flares.".to_string(),
            tool_calls: Vec::new(),
        },
        patch_state_reply("flag", serde_json::json!(true)),
    ]);

    let root = engine.init("You enter a dark cave.".to_string()).unwrap();
    let w1 = engine.act("Light the torch.".to_string()).await.unwrap();
    let p1 = engine.tree().read().get_node(w1).unwrap().parent_id.unwrap();

    let world_at_w1 = engine.world_state();
    assert_eq!(world_at_w1["state"]["flag"], serde_json::json!(true));

    let back_to = engine.erase(w1).unwrap();
    assert_eq!(back_to, p1);
    assert_eq!(engine.selected_node_id(), Some(p1));
    assert!(engine.tree().read().get_node(w1).is_none());
    assert!(engine.tree().read().get_node(p1).is_some());
    assert!(engine.tree().read().get_node(root).is_some());
    assert_eq!(engine.world_state()["state"].get("flag"), None);

    let forward = engine.undo().unwrap();
    assert_eq!(forward, w1);
    assert_eq!(engine.selected_node_id(), Some(w1));
    assert!(engine.tree().read().get_node(w1).is_some());
    assert!(engine.tree().read().get_node(p1).is_some());
    assert!(engine.tree().read().get_node(root).is_some());
    assert_eq!(engine.world_state(), world_at_w1);
}
