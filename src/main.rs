//! topt-native CLI
//!
//! Builds and packages every target the host supports into the output
//! directory. Configuration comes from `topt-native.toml` and `TOPT_NATIVE_*`
//! variables; the command line only takes `--help`.

use clap::Parser;
use std::env;
use std::process;

use topt_native::app;

#[derive(Parser)]
#[command(name = "topt-native")]
#[command(
    about = "Build, post-process and package the libtestoptimization native library",
    long_about = None,
    disable_version_flag = true
)]
struct Cli {}

fn main() {
    let _cli = Cli::parse();
    app::init_tracing();

    let workdir = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: cannot determine working directory: {}", e);
            process::exit(1);
        }
    };

    match app::run_native_build(&workdir, None) {
        Ok(summary) => {
            println!("{}", app::render_report(&summary));
            process::exit(summary.exit_code);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
