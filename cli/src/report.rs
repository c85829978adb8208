use colored::*;
use font_core::{OutcomeStatus, PipelineReport};
use font_setup::FontFetchConfig;

pub fn print_report(report: &PipelineReport, dry_run: bool, verbose: bool) {
    println!("{}", "=".repeat(60));
    if dry_run {
        println!("{}", "🔎 FONT REPORT (dry run, nothing was written)".bold());
    } else {
        println!("{}", "🔤 FONT REPORT".bold());
    }
    println!("{}", "=".repeat(60));

    for outcome in &report.outcomes {
        let line = format!("{:<40} {}", outcome.identity.to_string(), outcome.status);
        let line = match &outcome.status {
            OutcomeStatus::AlreadyInstalled { .. } | OutcomeStatus::Bundled => line.normal(),
            OutcomeStatus::Resolved { .. } => line.green(),
            OutcomeStatus::WouldInstall { .. } => line.cyan(),
            _ => line.red(),
        };
        println!("  {}", line);

        if verbose {
            for file in &outcome.referenced_by {
                println!("      ↪ {}", file.display().to_string().dimmed());
            }
            for attempt in &outcome.attempts {
                println!("      · {}: {:?}", attempt.source, attempt.outcome);
            }
        }
    }

    if !report.file_errors.is_empty() {
        println!("\n{}", "⚠️  Files that could not be read:".yellow().bold());
        for failure in &report.file_errors {
            println!("  {} ({}): {}", failure.path.display(), failure.kind, failure.reason);
        }
    }

    for warning in &report.warnings {
        println!("{} {}", "⚠️ ".yellow(), warning);
    }

    let count = |pred: fn(&OutcomeStatus) -> bool| report.outcomes.iter().filter(|o| pred(&o.status)).count();
    let installed = count(|s| matches!(s, OutcomeStatus::Resolved { .. } | OutcomeStatus::WouldInstall { .. }));
    let present = count(|s| matches!(s, OutcomeStatus::AlreadyInstalled { .. } | OutcomeStatus::Bundled));
    let failed = count(OutcomeStatus::is_failure);

    println!("\n{}", "-".repeat(60));
    println!(
        "{} fonts: {} {}, {} present, {} failed",
        report.outcomes.len(),
        installed,
        if dry_run { "to install" } else { "installed" },
        present,
        failed
    );
    if report.aborted {
        println!("{}", "Run was interrupted; some fonts were not processed".yellow());
    }
    if failed == 0 && report.file_errors.is_empty() && !report.aborted {
        println!("{}", "✅ All referenced fonts are available".green().bold());
    }
}

pub fn print_config(config: &FontFetchConfig) {
    println!("{}", "=".repeat(50));
    println!("📋 CURRENT CONFIGURATION");
    println!("{}", "=".repeat(50));

    println!("\n🌐 Sources (in order): {}", config.sources.join(", "));
    println!(
        "   API key: {}",
        if config.api_key.is_some() { "set in config" } else { "not set in config" }
    );
    println!("   Request timeout: {}s", config.request_timeout_secs);

    println!("\n🔁 Retry:");
    println!("   Attempts: {}", config.retry.max_attempts);
    println!("   Backoff: {}ms up to {}ms", config.retry.base_delay_ms, config.retry.max_delay_ms);

    println!("\n⚙️  Workers:");
    println!("   Scan: {}", config.concurrency.scan_workers);
    println!("   Resolve: {}", config.concurrency.resolve_workers);

    println!("\n📁 Directories:");
    if config.font_dirs.is_empty() {
        println!("   Font dirs: system defaults");
    } else {
        for dir in &config.font_dirs {
            println!("   Font dir: {}", dir.display());
        }
    }
    match &config.install_dir {
        Some(dir) => println!("   Install dir: {}", dir.display()),
        None => println!("   Install dir: user font directory"),
    }

    println!("\n{}", "=".repeat(50));
}
