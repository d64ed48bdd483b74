mod cli;

use std::path::PathBuf;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TERRAMATE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = run(cli);

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let workdir = std::env::current_dir()?.canonicalize()?;
    let root = match &cli.root {
        Some(root) => root.canonicalize()?,
        None => workdir.clone(),
    };
    anyhow::ensure!(
        terramate::project::is_inside(&root, &workdir),
        "work directory {} is not inside project root {}",
        workdir.display(),
        root.display(),
    );

    match cli.command {
        cli::Command::Generate => generate(&root, &workdir),
        cli::Command::Stacks => stacks(&root, &workdir),
        cli::Command::Order => order(&root, &workdir),
        cli::Command::Globals(out_cli) => globals(&root, &workdir, out_cli),
        cli::Command::RunEnv => run_env(&root, &workdir),
    }
}

fn generate(root: &PathBuf, workdir: &PathBuf) -> anyhow::Result<()> {
    let report = terramate::generate::do_generate(root, workdir);
    println!("{report}");
    anyhow::ensure!(!report.has_failures(), "code generation failed");
    Ok(())
}

fn stacks(root: &PathBuf, workdir: &PathBuf) -> anyhow::Result<()> {
    for stack in list_stacks(root, workdir)? {
        println!("{stack}");
    }
    Ok(())
}

fn order(root: &PathBuf, workdir: &PathBuf) -> anyhow::Result<()> {
    let stacks = list_stacks(root, workdir)?;
    let ordered = terramate::order::run_order(root, stacks)
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    for stack in ordered {
        println!("{stack}");
    }
    Ok(())
}

fn globals(root: &PathBuf, workdir: &PathBuf, cli: cli::GlobalsCommand) -> anyhow::Result<()> {
    for stack in list_stacks(root, workdir)? {
        let globals = terramate::globals::load(root, &stack)
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;

        println!("stack {stack}:");
        match cli.output.format {
            cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), &globals.value())?,
            cli::OutputFormat::Json => {
                serde_json::to_writer_pretty(std::io::stdout(), &globals.value())?;
                println!();
            }
        }
    }
    Ok(())
}

fn run_env(root: &PathBuf, workdir: &PathBuf) -> anyhow::Result<()> {
    for stack in list_stacks(root, workdir)? {
        let env = terramate::run::load_env(root, &stack)
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;

        println!("stack {stack}:");
        for var in env {
            println!("\t{var}");
        }
    }
    Ok(())
}

fn list_stacks(root: &PathBuf, workdir: &PathBuf) -> anyhow::Result<Vec<terramate::stack::Stack>> {
    let stacks = terramate::stack::list(root).map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(stacks
        .into_iter()
        .filter(|stack| terramate::project::is_inside(workdir, stack.host_path()))
        .collect())
}
