//! CLI for the faultsweep campaign engine.
//!
//! # Usage
//!
//! ```bash
//! # Run a full computational campaign
//! faultsweep run --app wordcount --template ../wordcount_orthrus \
//!     --test-defs testdefs.json --output wc.json
//!
//! # Quick sanity check over a 100-site subsample
//! faultsweep run --app wordcount --template ../wordcount_orthrus --mode lite
//!
//! # Consistency campaign against a previously persisted baseline
//! faultsweep run --app wordcount --template ../wordcount_rbv \
//!     --variant rbv --category consistency
//!
//! # Just list the eligible injection sites
//! faultsweep inspect --app wordcount --template ../wordcount_orthrus \
//!     --allow '.*_ZN3app.*'
//! ```
//!
//! A SIGINT or SIGTERM stops submission of new work and dumps every fully
//! finished site to the output file before exiting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::{Parser, Subcommand};

use faultsweep_campaign::campaign::{Campaign, CampaignConfig, TestMode};
use faultsweep_campaign::testdef;
use faultsweep_fault::Category;

#[derive(Parser)]
#[command(name = "faultsweep")]
#[command(about = "Fault-injection campaigns against instrumented binaries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a campaign: inspect, profile, inject, persist.
    Run {
        /// Application under test (key in the test-definition manifest).
        #[arg(short, long)]
        app: String,

        /// Test-definition manifest.
        #[arg(long, default_value = "testdefs.json")]
        test_defs: PathBuf,

        /// Instrumented template source tree the build slots are seeded from.
        #[arg(short, long)]
        template: PathBuf,

        /// Campaign tag; defaults to a timestamped one.
        #[arg(long)]
        tag: Option<String>,

        /// Scratch directory root.
        #[arg(long, default_value = "/tmp/faultsweep")]
        work_dir: PathBuf,

        /// Result file.
        #[arg(short, long, default_value = "output.json")]
        output: PathBuf,

        /// Directory for persisted sampling baselines.
        #[arg(long, default_value = "faultsweep-state")]
        state_dir: PathBuf,

        /// Campaign category: computational or consistency.
        #[arg(short, long, default_value = "computational")]
        category: Category,

        /// Test mode: full or lite.
        #[arg(short, long, default_value = "full")]
        mode: TestMode,

        /// Detector variant label; keys the sampling baseline.
        #[arg(long, default_value = "orthrus")]
        variant: String,

        /// LLVM toolchain directory, exported to builds as CC/CXX.
        #[arg(long)]
        llvm_dir: Option<PathBuf>,

        /// Parallel builds (and build slots).
        #[arg(long, default_value = "1")]
        build_jobs: usize,

        /// Parallel test runs.
        #[arg(long, default_value = "32")]
        test_jobs: usize,

        /// Per-process wall-clock timeout in seconds.
        #[arg(long, default_value = "600")]
        timeout: u64,

        /// Master seed; omitted, one is drawn from entropy and logged.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Allow regex for eligible function names (repeatable; empty = all).
        #[arg(long)]
        allow: Vec<String>,

        /// Deny regex for function names (repeatable, wins over --allow).
        #[arg(long)]
        deny: Vec<String>,
    },

    /// Build in inspect mode and print the eligible site map.
    Inspect {
        /// Application under test (key in the test-definition manifest).
        #[arg(short, long)]
        app: String,

        /// Test-definition manifest.
        #[arg(long, default_value = "testdefs.json")]
        test_defs: PathBuf,

        /// Instrumented template source tree.
        #[arg(short, long)]
        template: PathBuf,

        /// Campaign tag; reuses that campaign's cached site map.
        #[arg(long)]
        tag: Option<String>,

        /// Scratch directory root.
        #[arg(long, default_value = "/tmp/faultsweep")]
        work_dir: PathBuf,

        /// LLVM toolchain directory, exported to builds as CC/CXX.
        #[arg(long)]
        llvm_dir: Option<PathBuf>,

        /// Per-process wall-clock timeout in seconds.
        #[arg(long, default_value = "600")]
        timeout: u64,

        /// Allow regex for eligible function names (repeatable; empty = all).
        #[arg(long)]
        allow: Vec<String>,

        /// Deny regex for function names (repeatable, wins over --allow).
        #[arg(long)]
        deny: Vec<String>,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            app,
            test_defs,
            template,
            tag,
            work_dir,
            output,
            state_dir,
            category,
            mode,
            variant,
            llvm_dir,
            build_jobs,
            test_jobs,
            timeout,
            seed,
            allow,
            deny,
        } => {
            let config = CampaignConfig {
                tag: tag.unwrap_or_else(default_tag),
                app: app.clone(),
                variant,
                category,
                mode,
                template_dir: template,
                work_dir,
                output,
                state_dir,
                llvm_dir,
                build_jobs,
                test_jobs,
                run_timeout: Duration::from_secs(timeout),
                seed,
                allow_patterns: allow,
                deny_patterns: deny,
                ..Default::default()
            };
            cmd_run(&app, &test_defs, config);
        }
        Commands::Inspect {
            app,
            test_defs,
            template,
            tag,
            work_dir,
            llvm_dir,
            timeout,
            allow,
            deny,
        } => {
            let config = CampaignConfig {
                tag: tag.unwrap_or_else(|| format!("inspect_{app}")),
                app: app.clone(),
                template_dir: template,
                work_dir,
                llvm_dir,
                run_timeout: Duration::from_secs(timeout),
                allow_patterns: allow,
                deny_patterns: deny,
                ..Default::default()
            };
            cmd_inspect(&app, &test_defs, config);
        }
    }
}

fn cmd_run(app: &str, test_defs: &std::path::Path, config: CampaignConfig) {
    let test_def = match testdef::load_definition(test_defs, app) {
        Ok(def) => def,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!("  faultsweep campaign");
    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!();
    eprintln!("Configuration:");
    eprintln!("  App:        {app}");
    eprintln!("  Variant:    {}", config.variant);
    eprintln!("  Category:   {}", config.category);
    eprintln!("  Mode:       {}", config.mode);
    eprintln!("  Template:   {}", config.template_dir.display());
    eprintln!("  Tag:        {}", config.tag);
    eprintln!("  Build jobs: {}", config.build_jobs);
    eprintln!("  Test jobs:  {}", config.test_jobs);
    eprintln!("  Output:     {}", config.output.display());
    eprintln!();

    let mut campaign = match Campaign::new(config, test_def) {
        Ok(campaign) => campaign,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    install_cancel_handler(campaign.cancel_flag());

    let report = match campaign.run() {
        Ok(report) => report,
        Err(err) => {
            eprintln!();
            eprintln!("Campaign failed: {err}");
            std::process::exit(1);
        }
    };

    println!("{}", campaign.summary());

    if report.interrupted {
        eprintln!("Campaign interrupted; finished sites were dumped.");
        std::process::exit(130);
    }

    // A missed detection is the signal this tool exists for.
    let missed = report.verdicts.get("SCEE_Not_Detected").copied().unwrap_or(0);
    if missed > 0 {
        eprintln!("{missed} injection(s) escaped the detector.");
        std::process::exit(1);
    }
}

fn cmd_inspect(app: &str, test_defs: &std::path::Path, config: CampaignConfig) {
    let test_def = match testdef::load_definition(test_defs, app) {
        Ok(def) => def,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let mut campaign = match Campaign::new(config, test_def) {
        Ok(campaign) => campaign,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let map = match campaign.inspect_eligible() {
        Ok(map) => map,
        Err(err) => {
            eprintln!("Inspect failed: {err}");
            std::process::exit(1);
        }
    };

    let mut total = 0;
    for (function, insts) in &map {
        println!("{function}: {} sites", insts.len());
        total += insts.len();
    }
    println!();
    println!("{} functions, {total} eligible sites", map.len());
}

fn default_tag() -> String {
    format!(
        "scee_test_{}",
        chrono::Local::now().format("%Y_%m_%d_%H_%M_%S")
    )
}

static CANCEL: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Signal handler for SIGINT + SIGTERM (avoids pulling in a signal crate).
fn install_cancel_handler(flag: Arc<AtomicBool>) {
    let _ = CANCEL.set(flag);

    extern "C" fn handler(_: libc::c_int) {
        if let Some(flag) = CANCEL.get() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    unsafe {
        let h = handler as *const () as libc::sighandler_t;
        libc::signal(libc::SIGINT, h);
        libc::signal(libc::SIGTERM, h);
    }
}
