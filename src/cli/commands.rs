//! CLI command definitions

use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use uuid::Uuid;

/// UVM CLI
#[derive(Parser, Debug)]
#[command(name = "uvm", version, about = "UTM VM manager: provision, drive and reach into UTM guests")]
pub struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to UTM.app (overrides the configured location)
    #[arg(long, env = "UVM_APP_PATH", global = true)]
    pub utm_app: Option<PathBuf>,

    /// Kill guest commands and transfers after this many seconds
    #[arg(long, env = "UVM_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// List gallery templates
    Gallery {
        /// Only templates for this OS (linux|windows|macos|freebsd)
        #[arg(long)]
        os: Option<String>,

        /// Only templates for this architecture (arm64|x86_64)
        #[arg(long)]
        arch: Option<String>,
    },

    /// Create a VM from a gallery template
    Create {
        /// Gallery key, e.g. debian-13-arm
        key: String,

        /// VM name (defaults to the template key)
        #[arg(long)]
        name: Option<String>,

        /// Network mode of the first interface (shared|emulated|bridged|host)
        #[arg(long, default_value = "shared")]
        network_mode: String,

        /// Print the steps to do it by hand instead of driving UTM
        #[arg(long)]
        manual: bool,

        /// Continue provisioning an existing VM with the same name
        #[arg(long, short)]
        force: bool,

        /// With --force: delete the existing VM and start over
        #[arg(long, requires = "force")]
        recreate: bool,

        /// With --force: continue the VM with this UUID
        #[arg(long, requires = "force", conflicts_with = "recreate")]
        resume: Option<Uuid>,
    },

    /// Start a VM
    Start { vm: String },

    /// Stop a VM
    Stop { vm: String },

    /// Show a VM's state and configuration
    Status {
        vm: String,
        #[arg(long)]
        json: bool,
    },

    /// List VMs known to UTM
    List {
        #[arg(long)]
        json: bool,
    },

    /// Delete a VM
    Delete {
        vm: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Run a command in the guest shell
    Exec {
        vm: String,

        /// Use cmd.exe instead of /bin/sh
        #[arg(long)]
        windows: bool,

        /// A single argument is run as a shell command line; several are
        /// quoted individually first
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Copy a local file into the guest
    Push {
        vm: String,
        local: PathBuf,
        remote: String,
    },

    /// Copy a guest file to the host
    Pull {
        vm: String,
        remote: String,
        local: PathBuf,
    },

    /// Add an emulated VLAN interface if the VM has none
    SetupNetwork { vm: String },

    /// Manage port forwards
    Forward {
        #[command(subcommand)]
        cmd: ForwardCmd,
    },

    /// Export a VM as a .utm bundle
    Export { vm: String, output: PathBuf },

    /// Import a .utm bundle
    Import { bundle: PathBuf },

    /// Move UTM.app and cached media from ./.uvm into the shared uvm home
    Migrate {
        /// Project root holding .uvm (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Print the resolved paths configuration
    Paths,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Install Fish shell completions automatically
    InstallFish,

    /// Generate man page
    ManPage,
}

#[derive(Subcommand, Debug)]
pub enum ForwardCmd {
    /// Forward a host port to a guest port
    Add {
        vm: String,
        #[arg(long)]
        guest_port: u16,
        #[arg(long)]
        host_port: u16,
        /// tcp|udp
        #[arg(long, default_value = "tcp")]
        protocol: String,
        /// Interface index (defaults to the first emulated VLAN interface)
        #[arg(long)]
        index: Option<usize>,
        #[arg(long, default_value = crate::vm::instance::DEFAULT_HOST_ADDRESS)]
        host_address: String,
        /// Guest address (defaults to the VM's reported address when running)
        #[arg(long)]
        guest_address: Option<String>,
        /// Add an emulated VLAN interface first if needed
        #[arg(long)]
        setup_network: bool,
    },

    /// Remove the forward for a guest port
    Remove {
        vm: String,
        #[arg(long)]
        guest_port: u16,
        #[arg(long, default_value = "tcp")]
        protocol: String,
        #[arg(long)]
        index: Option<usize>,
    },

    /// List forwards on every interface
    List { vm: String },
}
