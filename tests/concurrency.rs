//! Concurrent callers on one controller never interleave device commands.

use drum_stage::adapters::DummyDrum;
use drum_stage::{SafeMotionController, StageConfig};
use std::sync::Arc;
use std::time::Duration;

fn config() -> StageConfig {
    let mut config = StageConfig::default();
    config.radius.max_steps = 1000;
    config.angle.max_steps = 4000;
    config.angle.steps_per_unit = 1.0;
    config.angle.wrap_steps = None;
    config
}

async fn homed_stage() -> (Arc<SafeMotionController<DummyDrum>>, DummyDrum) {
    let drum = DummyDrum::new().with_latency(Duration::from_millis(2));
    let stage = SafeMotionController::new(drum.clone(), config()).unwrap();
    stage.initialize().await.unwrap();
    drum.clear_log();
    (Arc::new(stage), drum)
}

fn strings(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_simultaneous_moves_are_serialized() {
    let (stage, drum) = homed_stage().await;

    let a = tokio::spawn({
        let stage = Arc::clone(&stage);
        async move { stage.move_abs(100.0, 100.0).await }
    });
    let b = tokio::spawn({
        let stage = Arc::clone(&stage);
        async move { stage.move_abs(200.0, 300.0).await }
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let a_first = strings(&[
        "a_go 100", "r_go 100", "a_idle", "r_idle", "a_go 200", "r_go 100", "a_idle", "r_idle",
    ]);
    let b_first = strings(&[
        "a_go 300", "r_go 200", "a_idle", "r_idle", "a_go -200", "r_go -100", "a_idle", "r_idle",
    ]);
    let log = drum.command_log();
    assert!(log == a_first || log == b_first, "interleaved log: {log:?}");
    assert_eq!(drum.steps(), stage.current_steps().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_callers_keep_moves_contiguous() {
    let (stage, drum) = homed_stage().await;

    let mut handles = Vec::new();
    for i in 1..=8 {
        let stage = Arc::clone(&stage);
        handles.push(tokio::spawn(async move {
            stage.move_abs(i as f64 * 10.0, i as f64 * 20.0).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // every move is: [a_go] [r_go] a_idle r_idle, never mixed with another
    let log = drum.command_log();
    let mut count = 0;
    for block in log.split(|line| line == "r_idle") {
        if block.is_empty() {
            continue;
        }
        count += 1;
        assert_eq!(block.last().map(String::as_str), Some("a_idle"), "{block:?}");
        let gos = &block[..block.len() - 1];
        assert!(gos.len() <= 2, "{block:?}");
        if let [first, second] = gos {
            assert!(first.starts_with("a_go") && second.starts_with("r_go"), "{block:?}");
        }
    }
    assert_eq!(count, 8);
    assert_eq!(drum.steps(), stage.current_steps().unwrap());
}
