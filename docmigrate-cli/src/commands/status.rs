use anyhow::Result;
use docmigrate::RunOptions;
use std::process::ExitCode;

pub async fn run(environment: &str, verbose: bool, json: bool) -> Result<ExitCode> {
    let runner = super::connect(environment, RunOptions::default().verbose(verbose)).await?;
    let registry = crate::registry::build()?;
    let status = runner.get_status(&registry).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("📋 Migration status for '{}'", status.environment);

    println!("\nApplied ({}):", status.applied.len());
    for id in &status.applied {
        println!("  ✓ {}", id);
    }

    println!("\nPending ({}):", status.pending.len());
    for id in &status.pending {
        let description = registry
            .get(id)
            .map(|m| m.description().to_string())
            .unwrap_or_default();
        println!("  • {} - {}", id, description);
    }

    if !status.unknown.is_empty() {
        println!("\n⚠️  Recorded but unknown to this build ({}):", status.unknown.len());
        for id in &status.unknown {
            println!("  ? {}", id);
        }
    }

    if status.is_up_to_date() {
        println!("\n✅ Up to date");
    }

    Ok(ExitCode::SUCCESS)
}
