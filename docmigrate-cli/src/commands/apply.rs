use anyhow::Result;
use docmigrate::migrations::DRY_RUN_PREFIX;
use docmigrate::RunOptions;
use std::process::ExitCode;

pub async fn run(
    environment: &str,
    verbose: bool,
    dry_run: bool,
    to: Option<String>,
) -> Result<ExitCode> {
    let mut options = RunOptions::default().verbose(verbose).dry_run(dry_run);
    if let Some(target) = to {
        options = options.target(target);
    }

    let runner = super::connect(environment, options).await?;
    if runner.environment().is_production() && !dry_run {
        log::warn!(
            "Applying migrations to production environment '{}'",
            runner.environment().name
        );
    }

    let registry = crate::registry::build()?;
    let report = runner.run_migrations(&registry).await?;

    let marker = if report.dry_run {
        format!("{} ", DRY_RUN_PREFIX)
    } else {
        String::new()
    };

    if report.results.is_empty() {
        println!("{}✅ No pending migrations for '{}'", marker, report.environment);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}🚀 Migrations for '{}':", marker, report.environment);
    for result in &report.results {
        match &result.error {
            None => println!("  ✓ {} ({} ms)", result.id, result.duration_ms),
            Some(error) => println!(
                "  ✗ {} - {} ({} ms): {}",
                result.id, result.description, result.duration_ms, error
            ),
        }
    }

    if report.dry_run {
        println!("\nIntended actions (nothing was changed):");
        for line in runner.log().lines() {
            if line.message.starts_with(DRY_RUN_PREFIX) {
                println!("  {}", line.message);
            }
        }
    }

    if report.is_success() {
        let verb = if report.dry_run { "checked" } else { "applied" };
        println!("\n✅ {} migration(s) {}", report.applied(), verb);
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "\n❌ Run halted: {} of {} attempted migration(s) succeeded",
            report.applied(),
            report.results.len()
        );
        Ok(ExitCode::FAILURE)
    }
}
