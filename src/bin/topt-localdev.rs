//! topt-localdev: build the host's native library, then run cargo against it

use std::env;
use std::process;

use topt_native::app;

const USAGE: &str = "\
Usage: topt-localdev [-sn|--skip-native] [CARGO ARGS]...

Builds the native library for this host into the output directory, then runs
cargo with the SDK pointed at that build.

Options:
  -sn, --skip-native  Reuse the existing native build
  -h, --help          Print this help

Every other argument is passed to cargo unchanged.";

fn main() {
    let args = app::parse_localdev_args(env::args().skip(1));
    if args.help {
        println!("{}", USAGE);
        return;
    }
    app::init_tracing();

    let workdir = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: cannot determine working directory: {}", e);
            process::exit(1);
        }
    };

    match app::run_localdev(&workdir, &args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
