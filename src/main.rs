use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kodegen_bundler_export::config::{DEFAULT_BASE64_OUTPUT, DEFAULT_ENV_FILE, DEFAULT_P12_OUTPUT};
use kodegen_bundler_export::macos::SystemRunner;
use kodegen_bundler_export::macos::validation::expand_tilde_path;
use kodegen_bundler_export::{ExportError, ExportOptions, ExportPaths, ExportReport, Pipeline};

// Status output follows the library convention: colour writes are
// decorative and their errors are ignored with `let _ =`.

#[derive(Parser)]
#[command(name = "kodegen_export")]
#[command(
    version,
    about = "Export a signing identity to a verified, base64-encoded P12 for CI"
)]
struct Cli {
    /// Env file with APPLE_CERT_HASH and APPLE_CERT_EXPORT_PASS
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    env_file: String,

    /// Where to write the exported P12 bundle
    #[arg(long, short = 'o', default_value = DEFAULT_P12_OUTPUT)]
    output: String,

    /// Where to write the base64 rendering of the bundle
    #[arg(long, default_value = DEFAULT_BASE64_OUTPUT)]
    base64_output: String,

    /// Export every identity in the login keychain, not only APPLE_CERT_HASH
    #[arg(long)]
    all_identities: bool,

    /// Log every security invocation (passwords masked)
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            kodegen_bundler_export::error!("Error: {e:#}");
            if let Some(hint) = e.downcast_ref::<ExportError>().and_then(ExportError::hint) {
                eprintln!("   {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    if !cfg!(target_os = "macos") {
        return Err(ExportError::UnsupportedPlatform(std::env::consts::OS.to_string()).into());
    }

    let options = ExportOptions {
        paths: ExportPaths {
            env_file: PathBuf::from(expand_tilde_path(&cli.env_file)?),
            p12_output: PathBuf::from(expand_tilde_path(&cli.output)?),
            base64_output: PathBuf::from(expand_tilde_path(&cli.base64_output)?),
        },
        all_identities: cli.all_identities,
    };

    let runner = SystemRunner::new();
    let mut pipeline = Pipeline::new(&runner, options);

    match pipeline.run().await {
        Ok(report) => {
            print_summary(&report);
            Ok(())
        }
        Err(e) => {
            let stage = pipeline
                .failed_during()
                .map(|s| s.to_string())
                .unwrap_or_default();
            Err(anyhow::Error::new(e).context(format!("Export failed while {stage}")))
        }
    }
}

fn print_summary(report: &ExportReport) {
    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();
    let _ = writeln!(&mut buffer, "\n{}", "=".repeat(60));
    let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
    let _ = writeln!(&mut buffer, "🎉 EXPORT & VERIFICATION SUCCESSFUL");
    let _ = buffer.reset();
    let _ = writeln!(&mut buffer, "{}", "=".repeat(60));
    if let Some(identity) = &report.identity {
        let _ = writeln!(&mut buffer, "Identity: {} ({})", identity.name, identity.hash);
    }
    let _ = writeln!(
        &mut buffer,
        "Bundle:   {} ({} bytes)",
        report.p12_path.display(),
        report.size
    );
    let _ = writeln!(
        &mut buffer,
        "ACTION REQUIRED: Update your GitHub Secret 'APPLE_CERTIFICATE' now."
    );
    let _ = writeln!(
        &mut buffer,
        "Copy the content of: {}",
        report.base64_path.display()
    );
    let _ = writeln!(&mut buffer, "{}", "=".repeat(60));
    let _ = bufwtr.print(&buffer);
}
