mod cli;

use recast::ast::Ast;
use recast::rules::RuleList;
use recast::vars::Vars;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("RECAST_LOG"))
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
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Transpile(transpile_cli) => transpile(transpile_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn transpile(cli: cli::TranspileCommand) -> anyhow::Result<()> {
    let document = match &cli.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let value: serde_json::Value = serde_yaml::from_str(&document)?;
    let mut ast = Ast::from_value(value)?;

    if let Some(vars_path) = &cli.vars {
        let raw = std::fs::read_to_string(vars_path)?;
        let mapping: serde_json::Value = serde_yaml::from_str(&raw)?;
        let vars = Vars::new(mapping)?;
        ast.apply(&vars)?;
        tracing::debug!(hash = %ast.hash_str(), "applied variable context");
    }

    if let Some(rules_path) = &cli.rules {
        let raw = std::fs::read_to_string(rules_path)?;
        let rules: RuleList = serde_yaml::from_str(&raw)?;
        rules.apply(&mut ast)?;
        tracing::debug!(hash = %ast.hash_str(), "applied rule pipeline");
    }

    output(&cli.output, &ast)?;
    Ok(())
}

fn output(output: &cli::OutputArgs, ast: &Ast) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), ast)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), ast)?,
    };

    Ok(())
}
