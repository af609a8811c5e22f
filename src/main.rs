use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::time::Duration;
use uvm::bridge::codes::{Arch, NetworkMode, Protocol};
use uvm::bridge::{Bridge, OsaScript};
use uvm::cli::commands::{Cli, Cmd, ForwardCmd};
use uvm::cli::completions::{install_fish_completions, print_completions, render_man_page};
use uvm::config::schema::{GalleryEntry, OsFamily};
use uvm::guest::{Guest, GuestShell, Utmctl};
use uvm::network::NetworkConfigurator;
use uvm::utils::paths::uvm_home;
use uvm::vm::bundle::{export_vm, import_vm};
use uvm::vm::creator::{manual_instructions, CreateMode};
use uvm::vm::instance::{vm_ref, PortForward};
use uvm::vm::media::HttpFetcher;
use uvm::{CreateParams, Gallery, PathsConfig, VmCreator, VmManager};

/// ---- main ----
fn main() -> Result<()> {
    let cli = Cli::parse();
    uvm::logging::init(cli.verbose);

    let timeout = cli.timeout.map(Duration::from_secs);
    let app_override = cli.utm_app.clone();
    let paths = || PathsConfig::from_env(app_override.as_deref());
    let utmctl = |paths: &PathsConfig| Utmctl::from_paths(paths).with_timeout(timeout);

    match cli.cmd {
        Cmd::Gallery { os, arch } => {
            let gallery = Gallery::load()?;
            let os = os.as_deref().map(OsFamily::parse).transpose()?;
            let arch = arch.as_deref().map(Arch::parse).transpose()?;
            let mut entries = match os {
                Some(os) => gallery.filter_by_os(os),
                None => gallery.entries().to_vec(),
            };
            if let Some(arch) = arch {
                let by_arch = gallery.filter_by_arch(arch);
                entries.retain(|e| by_arch.contains(e));
            }
            print_gallery(&entries);
        }

        Cmd::Create {
            key,
            name,
            network_mode,
            manual,
            force,
            recreate,
            resume,
        } => {
            let gallery = Gallery::load()?;
            let paths = paths()?;
            let params = CreateParams {
                key,
                name,
                network_mode: NetworkMode::parse(&network_mode)?,
                mode: if manual {
                    CreateMode::Manual
                } else {
                    CreateMode::Automated
                },
                force,
                recreate,
                resume,
            };

            if params.mode == CreateMode::Manual {
                let entry = gallery.get(&params.key)?;
                let name = params.name.as_deref().unwrap_or(&entry.key);
                println!("Create '{}' ({}) in UTM by hand:", name, entry.name);
                for (i, step) in manual_instructions(entry, name, params.network_mode, &paths)
                    .iter()
                    .enumerate()
                {
                    println!("  {}. {}", i + 1, step);
                }
                return Ok(());
            }

            let bridge = OsaScript::locate();
            let fetcher = HttpFetcher::new();
            let report = VmCreator::new(&bridge, &gallery, &paths, &fetcher).provision(&params)?;
            if !report.skipped.is_empty() {
                let skipped: Vec<&str> = report.skipped.iter().map(|s| s.as_str()).collect();
                println!("Already done: {}", skipped.join(", "));
            }
            println!("Created VM '{}' ({})", report.name, vm_ref(&report.uuid));
        }

        Cmd::Start { vm } => {
            let bridge = OsaScript::locate();
            VmManager::new(&bridge).start_vm(&vm)?;
            println!("Started VM '{vm}'");
        }

        Cmd::Stop { vm } => {
            let bridge = OsaScript::locate();
            VmManager::new(&bridge).stop_vm(&vm)?;
            println!("Stopped VM '{vm}'");
        }

        Cmd::Status { vm, json } => {
            let bridge = OsaScript::locate();
            let info = VmManager::new(&bridge).status(&vm)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{} ({})", info.name, vm_ref(&info.uuid));
                println!("  State:   {}", info.state);
                println!("  Backend: {}", info.backend);
                if let Some(arch) = info.arch {
                    println!("  Arch:    {arch}");
                }
                for d in &info.drives {
                    println!(
                        "  Drive:   {}{}{}",
                        d.interface.map(|i| i.as_str()).unwrap_or("default"),
                        if d.removable { " (removable)" } else { "" },
                        d.size_mib.map(|s| format!(" {s} MiB")).unwrap_or_default()
                    );
                }
                for n in &info.interfaces {
                    println!("  Network: #{} {} ({} forwards)", n.index, n.mode, n.forwards.len());
                }
            }
        }

        Cmd::List { json } => {
            let bridge = OsaScript::locate();
            let vms = VmManager::new(&bridge).list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&vms)?);
            } else if vms.is_empty() {
                println!("No VMs.");
            } else {
                for vm in vms {
                    println!("{:<24} {:<10} {:<6} {}", vm.name, vm.state, vm.backend, vm_ref(&vm.uuid));
                }
            }
        }

        Cmd::Delete { vm, force } => {
            let bridge = OsaScript::locate();
            if VmManager::new(&bridge).delete_vm(&vm, force)? {
                println!("Successfully deleted VM '{vm}'");
            }
        }

        Cmd::Exec {
            vm,
            windows,
            command,
        } => {
            let ctl = utmctl(&paths()?);
            let shell = shell(windows);
            let code = Guest::new(&ctl, shell).exec(&vm, &shell.command_line(&command))?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Cmd::Push { vm, local, remote } => {
            let ctl = utmctl(&paths()?);
            let bytes = Guest::new(&ctl, GuestShell::default()).push(&vm, &local, &remote)?;
            println!("Pushed {} ({bytes} bytes) to {vm}:{remote}", local.display());
        }

        Cmd::Pull { vm, remote, local } => {
            let ctl = utmctl(&paths()?);
            let bytes = Guest::new(&ctl, GuestShell::default()).pull(&vm, &remote, &local)?;
            println!("Pulled {vm}:{remote} ({bytes} bytes) to {}", local.display());
        }

        Cmd::SetupNetwork { vm } => {
            let bridge = OsaScript::locate();
            let index = NetworkConfigurator::new(&bridge).setup_emulated_network(&vm)?;
            println!("Emulated VLAN interface #{index} ready on '{vm}'");
        }

        Cmd::Forward { cmd } => {
            let bridge = OsaScript::locate();
            forward(&bridge, cmd, || Ok(utmctl(&paths()?)))?;
        }

        Cmd::Export { vm, output } => {
            let bridge = OsaScript::locate();
            export_vm(&bridge, &vm, &output)?;
            println!("Exported '{vm}' to {}", output.display());
        }

        Cmd::Import { bundle } => {
            let bridge = OsaScript::locate();
            let uuid = import_vm(&bridge, &bundle)?;
            println!("Imported {} as {}", bundle.display(), vm_ref(&uuid));
        }

        Cmd::Migrate { project } => {
            let project = match project {
                Some(p) => p,
                None => std::env::current_dir().context("reading current directory")?,
            };
            let report = uvm::migrate::migrate_all(&project, &uvm_home()?)?;
            for (from, to) in &report.moved {
                println!("Moved {} -> {}", from.display(), to.display());
            }
            for p in &report.already_present {
                println!("Already present: {}", p.display());
            }
            if report.is_noop() {
                println!("Nothing to migrate.");
            }
        }

        Cmd::Paths => {
            println!("{}", serde_json::to_string_pretty(&paths()?)?);
        }

        Cmd::Completions { shell } => {
            let mut cmd = Cli::command();
            print_completions(shell, &mut cmd);
        }

        Cmd::InstallFish => {
            let file = install_fish_completions()?;
            println!("Fish completions installed to: {}", file.display());
        }

        Cmd::ManPage => {
            print!("{}", render_man_page()?);
        }
    }

    Ok(())
}

fn shell(windows: bool) -> GuestShell {
    if windows {
        GuestShell::Windows
    } else {
        GuestShell::Posix
    }
}

fn print_gallery(entries: &[GalleryEntry]) {
    if entries.is_empty() {
        println!("No matching templates.");
        return;
    }
    for e in entries {
        println!(
            "{:<20} {:<8} {:<7} {:>5} MiB  {:>3} CPU  {}",
            e.key, e.os, e.arch, e.hardware.ram_mb, e.hardware.cpus, e.name
        );
    }
}

fn forward(
    bridge: &dyn Bridge,
    cmd: ForwardCmd,
    utmctl: impl FnOnce() -> Result<Utmctl>,
) -> Result<()> {
    let net = NetworkConfigurator::new(bridge);
    match cmd {
        ForwardCmd::Add {
            vm,
            guest_port,
            host_port,
            protocol,
            index,
            host_address,
            guest_address,
            setup_network,
        } => {
            let index = match (index, setup_network) {
                (Some(i), _) => i,
                (None, true) => net.setup_emulated_network(&vm)?,
                (None, false) => default_interface(bridge, &vm)?,
            };
            let rule = PortForward {
                protocol: Protocol::parse(&protocol)?,
                guest_address,
                guest_port,
                host_address,
                host_port,
            };
            // utmctl is optional here; without it the rule targets any guest address.
            let ctl = utmctl().ok();
            let added = net.add_port_forward(
                &vm,
                index,
                &rule,
                ctl.as_ref().map(|c| c as &dyn uvm::guest::ControlUtility),
            )?;
            if added {
                println!("Forwarding {}:{host_port} -> {vm}:{guest_port}/{protocol}", rule.host_address);
            } else {
                println!("Forward already present");
            }
        }
        ForwardCmd::Remove {
            vm,
            guest_port,
            protocol,
            index,
        } => {
            let index = match index {
                Some(i) => i,
                None => default_interface(bridge, &vm)?,
            };
            if net.remove_port_forward(&vm, index, Protocol::parse(&protocol)?, guest_port)? {
                println!("Removed forward for {vm}:{guest_port}/{protocol}");
            } else {
                println!("No forward for {vm}:{guest_port}/{protocol}");
            }
        }
        ForwardCmd::List { vm } => {
            let forwards = net.list_port_forwards(&vm)?;
            if forwards.is_empty() {
                println!("No port forwards.");
            }
            for (index, f) in forwards {
                println!(
                    "#{index} {:<4} {}:{} -> {}:{}",
                    f.protocol,
                    f.host_address,
                    f.host_port,
                    f.guest_address.as_deref().unwrap_or("*"),
                    f.guest_port
                );
            }
        }
    }
    Ok(())
}

/// First emulated interface, else interface 0 (which reports why it can't forward).
fn default_interface(bridge: &dyn Bridge, vm: &str) -> Result<usize> {
    let info = uvm::bridge::utm::Utm::new(bridge).inspect(vm)?;
    let index = info.emulated_interfaces().next().map_or(0, |n| n.index);
    Ok(index)
}
