use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    /// The evolve repository upon which to operate (falls back to the
    /// EVOLVE_REPO environment variable, then to the config file)
    #[arg(short, long)]
    pub repo: Option<Utf8PathBuf>,

    /// The path to the evolve.toml config file
    #[arg(short, long, default_value = "evolve.toml")]
    pub config_file: Utf8PathBuf,

    /// Increase logging verbosity level (0: warn; 1: info; 2: debug; 3: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a repository root in an existing, empty directory
    Init,

    /// Create a new project, release or rlink
    #[command(subcommand)]
    Create(CreateCommand),

    /// Update an existing rlink
    #[command(subcommand)]
    Update(UpdateCommand),

    /// Copy a build artifact from a release's src tree into its bin tree
    Install {
        /// Repository path of the release
        release: String,
        /// Artifact path relative to the release's src directory
        artifact: String,
    },

    /// Mark a release deployed (a one-way transition)
    Deploy {
        /// Repository path of the release
        release: String,
    },

    /// List the contents of a repository location
    Ls {
        /// Repository path to list (defaults to the root)
        #[arg(default_value = "")]
        path: String,

        /// Recursively draw the tree below the path
        #[arg(short = 'R', long)]
        recursive: bool,
    },

    /// Display the repoint history of an rlink
    History {
        /// Repository path of the rlink
        path: String,
    },

    /// Remove an abandoned lock marker; fails if an active process still
    /// holds the lock
    Clean {
        /// Repository path whose lock marker to remove
        path: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CreateCommand {
    /// Create a project; missing intermediate projects are created too
    Project {
        /// Repository path of the new project
        path: String,
    },
    /// Create a release under a project
    Release {
        /// Repository path of the new release
        path: String,
    },
    /// Create an rlink beside a release, pointing at it
    Rlink {
        /// Repository path of the target release
        release: String,
        /// Name of the new rlink
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum UpdateCommand {
    /// Repoint an rlink at a different release of the same project
    Rlink {
        /// Repository path of the new target release
        release: String,
        /// Name of the rlink to repoint
        name: String,
    },
}
