//! bee-pilot CLI
//!
//! 读取一个目标（回车使用默认目标），运行一次编排循环，日志输出到终端，最终结果以 JSON 打印。

use std::io::Write;

use anyhow::Context;
use bee_pilot::agent::AgentRunner;
use bee_pilot::config::load_config;
use bee_pilot::observability;
use bee_pilot::react::TracingSink;

const DEFAULT_GOAL: &str = "Go to google.com and search for hello";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;

    print!("Enter your goal: ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read goal")?;
    let goal = match line.trim() {
        "" => DEFAULT_GOAL.to_string(),
        g => g.to_string(),
    };

    let runner = AgentRunner::from_config(&cfg);
    if !runner.llm_configured() {
        tracing::warn!("{} is not set; decision source calls will fail", cfg.llm.api_key_env);
    }

    let outcome = runner
        .run(&goal, cfg.agent.max_iterations, &TracingSink)
        .await
        .context("Agent run failed")?;

    println!("\nFinal Result: {}", outcome.result);
    let summary = serde_json::json!({
        "success": outcome.success,
        "result": outcome.result,
        "iterations": outcome.iterations,
        "history": outcome.history,
        "execution_log": outcome.execution_log,
        "error": outcome.error,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
