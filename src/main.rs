//! ampstack CLI: synthesize the Amplify + CodePipeline + Aurora stack.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "ampstack",
    version,
    about = "Assemble an Amplify app, its CodePipeline and an Aurora migration target into a CloudFormation template"
)]
struct Cli {
    #[command(subcommand)]
    command: ampstack::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = ampstack::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
