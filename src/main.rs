use std::error::Error;

use clap::Parser;

use repolink::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::DependencyChange,
    },
    config::RepolinkConfig,
    Repolink,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();
    let config = RepolinkConfig::load()?;

    let mut builder = Repolink::builder()
        .root(&cli_args.project_dir)
        .project_file_name(&cli_args.project_file);
    if let Some(cache_directory) = cli_args
        .cache_directory
        .map(Into::into)
        .or(config.cache_dir)
    {
        builder = builder.cache_directory(cache_directory);
    }
    if let Some(link_subdir) = config.link_subdir {
        builder = builder.link_subdir(link_subdir);
    }
    let repolink = builder.try_build()?;

    match cli_args.cmd {
        Command::Init { link_subdir } => {
            repolink.init(link_subdir)?;
            println!("Initialized project in {}", repolink.root().display());
        }
        Command::Add {
            url,
            branch,
            commit,
            directories,
        } => {
            repolink.add(url.clone(), branch, commit, directories)?;
            println!("Added {url}");
        }
        Command::Update {
            name,
            branch,
            commit,
            directories,
        } => {
            let change = DependencyChange {
                branch,
                commit,
                directories: (!directories.is_empty()).then_some(directories),
            };
            repolink.update(&name, change)?;
            println!("Updated {name}");
        }
        Command::Remove { name } => {
            repolink.remove(&name)?;
            println!("Removed {name}");
        }
        Command::Fetch => {
            repolink.fetch()?;
            println!("Dependencies fetched");
        }
        Command::Clean => {
            let report = repolink.clean()?;
            println!(
                "Evicted {} cache entries and removed {} abandoned projects",
                report.evicted.len() + report.vanished.len(),
                report.removed_clients.len()
            );
        }
        Command::List { cache } => {
            let mut out = std::io::stdout().lock();
            if cache {
                repolink.list_cache(&mut out)?;
            } else {
                repolink.list(&mut out)?;
            }
        }
        Command::Git { name, args } => repolink.git(&name, &args)?,
    }

    Ok(())
}
