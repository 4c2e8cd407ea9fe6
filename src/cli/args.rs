use clap::{Parser, Subcommand};

/// Shares Git repositories between projects through a local cache and links.
#[derive(Debug, Parser)]
#[command(version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: Command,
    /// Project directory holding the project configuration
    #[arg(short, long, global = true, default_value = ".")]
    pub project_dir: String,
    /// Name of the project configuration file
    #[arg(long, global = true, default_value = ".repolink")]
    pub project_file: String,
    /// Location of the shared cache. Defaults to $REPOLINK_CACHE_DIR or $HOME/.repolink
    #[arg(short, long, global = true)]
    pub cache_directory: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    ///Creates the project configuration in the project directory
    Init {
        /// Directory, relative to the project, that dependencies are linked into
        #[arg(short, long)]
        link_subdir: Option<String>,
    },
    ///Declares a dependency without fetching it
    Add {
        url: String,
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(long)]
        commit: Option<String>,
        /// Link only these subdirectories of the repository
        #[arg(short, long = "directory", value_delimiter = ',')]
        directories: Vec<String>,
    },
    ///Replaces a dependency's declaration and links it again
    Update {
        name: String,
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(long)]
        commit: Option<String>,
        #[arg(short, long = "directory", value_delimiter = ',')]
        directories: Vec<String>,
    },
    ///Removes a dependency and its link
    Remove { name: String },
    ///Fetches every declared dependency and links it into the project
    Fetch,
    ///Evicts cache entries that no project depends on
    Clean,
    ///Lists the declared dependencies
    List {
        /// List the shared cache instead
        #[arg(long)]
        cache: bool,
    },
    ///Runs git inside the cached clone of a dependency
    Git {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn verify_cli() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parse_directories_and_git_arguments() {
        let args = CliArgs::parse_from(["repolink", "add", "https://x/foo.git", "-d", "lib,include"]);
        match args.cmd {
            Command::Add { directories, .. } => {
                assert_eq!(directories, vec!["lib".to_string(), "include".to_string()])
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = CliArgs::parse_from(["repolink", "git", "foo", "log", "--oneline", "-n", "3"]);
        match args.cmd {
            Command::Git { name, args } => {
                assert_eq!(name, "foo");
                assert_eq!(args, vec!["log", "--oneline", "-n", "3"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
