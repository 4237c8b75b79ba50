use anyhow::{
    Context,
    Result,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::Path,
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Coinflip helper tasks (check bindings, clippy, tests)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompile coinflip_abi after editing abi/Coinflip.json
    Abi,
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run the workspace tests, including the fake-chain scenarios
    Test {
        /// Only test this package
        #[arg(short, long)]
        package: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root();

    match cli.command {
        Commands::Abi => check_abi(&root)?,
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { package } => run_tests(&root, package.as_deref())?,
    }

    Ok(())
}

fn repo_root() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("xtask has no parent directory")
        .to_path_buf()
}

fn check_abi(root: &Path) -> Result<()> {
    let abi = root.join("rust-crates/coinflip_abi/abi/Coinflip.json");
    ensure!(abi.exists(), "missing contract ABI at {}", abi.display());
    let mut cmd = Command::new("cargo");
    cmd.arg("check")
        .arg("-p")
        .arg("coinflip_abi")
        .arg("--quiet")
        .current_dir(root);
    run_command(cmd, "cargo check -p coinflip_abi")?;
    Ok(())
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("clippy")
        .arg("--workspace")
        .arg("--all-targets")
        .arg("--all-features")
        .arg("--")
        .arg("-D")
        .arg("warnings")
        .current_dir(root);
    run_command(cmd, "cargo clippy")?;
    Ok(())
}

fn run_tests(root: &Path, package: Option<&str>) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test").arg("--all-features").current_dir(root);
    let label = match package {
        Some(package) => {
            cmd.arg("-p").arg(package);
            format!("cargo test -p {package}")
        }
        None => {
            cmd.arg("--workspace");
            "cargo test --workspace".to_string()
        }
    };
    run_command(cmd, &label)?;
    Ok(())
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
