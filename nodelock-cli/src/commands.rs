//! Subcommands and their dispatch.

use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Subcommand, ValueEnum};
use tracing::{error, info};

use nodelock::hostname::{canonicalize_hostname, decanonicalize_hostname};
use nodelock::status::render;
use nodelock::targets::{read_targets_file, TargetsDocument};
use nodelock::{
    Acquisition, BatchOutcome, BatchPolicy, LeaseCoordinator, LeaseRequest, NodeStatus,
    NodeUpdate, RenderFormat, StatusQuery,
};

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Lock specific machines
    Lock {
        #[command(flatten)]
        machines: MachineArgs,

        /// Keep going after a machine fails to lock
        #[arg(short, long)]
        force: bool,

        /// Lock as this owner
        #[arg(long, env = "NODELOCK_OWNER")]
        owner: Option<String>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Unlock specific machines
    Unlock {
        #[command(flatten)]
        machines: MachineArgs,

        /// Keep going after a machine fails to unlock
        #[arg(short, long)]
        force: bool,

        /// Unlock as this owner
        #[arg(long, env = "NODELOCK_OWNER")]
        owner: Option<String>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Lock any free machines of a type
    LockMany {
        /// Number of machines to lock
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        num: u32,

        /// Machine type; a comma-separated list is tried in order
        #[arg(short, long)]
        machine_type: String,

        /// Lock as this owner
        #[arg(long, env = "NODELOCK_OWNER")]
        owner: Option<String>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Update description, status or host key
    Update {
        #[command(flatten)]
        machines: MachineArgs,

        #[command(flatten)]
        meta: MetadataArgs,

        /// New SSH host public key
        #[arg(long)]
        ssh_pub_key: Option<String>,
    },

    /// Show lock status
    List(ListArgs),

    /// Count machines by owner and type
    Summary {
        /// Only this machine type
        #[arg(short, long)]
        machine_type: Option<String>,
    },

    /// Refresh stored SSH host keys from the machines themselves
    UpdateKeys {
        #[command(flatten)]
        machines: MachineArgs,

        /// Scan every known machine
        #[arg(short, long, conflicts_with = "machines")]
        all: bool,
    },
}

impl Commands {
    /// Owner given on the command line for lease-changing commands.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Commands::Lock { owner, .. }
            | Commands::Unlock { owner, .. }
            | Commands::LockMany { owner, .. } => owner.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct MachineArgs {
    /// Machine names, short or fully qualified
    pub machines: Vec<String>,

    /// YAML file whose `targets` are added to the machines
    #[arg(short, long)]
    pub targets: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct MetadataArgs {
    /// Set the description
    #[arg(long)]
    pub desc: Option<String>,

    /// Mark up or down
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,
}

impl MetadataArgs {
    fn to_update(&self) -> NodeUpdate {
        NodeUpdate {
            description: self.desc.clone(),
            status: self.status.map(NodeStatus::from),
            ssh_pub_key: None,
        }
    }
}

/// `--status` values; anything else is rejected while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Up,
    Down,
}

impl From<StatusArg> for NodeStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Up => NodeStatus::Up,
            StatusArg::Down => NodeStatus::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Full records as JSON
    #[default]
    Json,
    /// One line per machine
    Brief,
    /// Targets YAML document
    Targets,
}

impl From<OutputFormat> for RenderFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => RenderFormat::Json,
            OutputFormat::Brief => RenderFormat::Brief,
            OutputFormat::Targets => RenderFormat::Targets,
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub machines: MachineArgs,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Only this machine type
    #[arg(short, long)]
    pub machine_type: Option<String>,

    /// Only machines locked by this owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Only machines that are up or down
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Only locked (true) or free (false) machines
    #[arg(long)]
    pub locked: Option<bool>,

    /// Only machines with exactly this description
    #[arg(long)]
    pub desc: Option<String>,

    /// Only machines whose description contains this text
    #[arg(long)]
    pub desc_pattern: Option<String>,

    /// Every machine, not just your own
    #[arg(short, long, conflicts_with_all = ["owner", "machines"])]
    pub all: bool,
}

/// What the binary prints and exits with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl CommandOutput {
    fn status(exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            exit_code,
        }
    }

    fn print(stdout: String) -> Self {
        Self {
            stdout,
            exit_code: 0,
        }
    }
}

/// Execute a command against `coordinator`.
///
/// Invalid option combinations fail before any request is made. Refused
/// locks and updates show up in the exit code; transport failures are errors.
pub async fn execute_command(
    coordinator: &LeaseCoordinator,
    command: Commands,
) -> anyhow::Result<CommandOutput> {
    match command {
        Commands::Lock {
            machines,
            force,
            meta,
            ..
        } => {
            let names = resolve_machines(coordinator, &machines)?;
            require_machines(&names, "lock")?;

            let outcome = coordinator
                .acquirer()
                .lock_names(&names, meta.desc.as_deref(), BatchPolicy::from_force(force))
                .await;
            let update_code = apply_metadata(coordinator, &outcome.succeeded, &meta).await;
            Ok(CommandOutput::status(outcome.exit_code().max(update_code)))
        }

        Commands::Unlock {
            machines,
            force,
            meta,
            ..
        } => {
            let names = resolve_machines(coordinator, &machines)?;
            require_machines(&names, "unlock")?;

            let outcome = coordinator
                .releaser()
                .release_names(&names, BatchPolicy::from_force(force))
                .await;
            let update_code = apply_metadata(coordinator, &outcome.succeeded, &meta).await;
            Ok(CommandOutput::status(outcome.exit_code().max(update_code)))
        }

        Commands::LockMany {
            num,
            machine_type,
            meta,
            ..
        } => lock_many(coordinator, num as usize, machine_type, meta).await,

        Commands::Update {
            machines,
            meta,
            ssh_pub_key,
        } => {
            let names = resolve_machines(coordinator, &machines)?;
            require_machines(&names, "update")?;

            let update = NodeUpdate {
                ssh_pub_key,
                ..meta.to_update()
            };
            if update.is_empty() {
                bail!("update needs at least one of --desc, --status or --ssh-pub-key");
            }

            let outcome = coordinator.updater().update_names(&names, &update).await;
            Ok(CommandOutput::status(outcome.exit_code()))
        }

        Commands::List(args) => list(coordinator, args).await,

        Commands::Summary { machine_type } => {
            let report = coordinator
                .summary()
                .summarize(machine_type.as_deref())
                .await?;
            Ok(CommandOutput::print(report.to_string()))
        }

        Commands::UpdateKeys { machines, all } => {
            let names = resolve_machines(coordinator, &machines)?;
            if names.is_empty() && !all {
                bail!("update-keys needs machines, --targets or --all");
            }

            let report = coordinator.scanner().scan_and_update(&names).await?;
            info!(
                updated = report.updated_count(),
                errors = report.error_count(),
                "Host keys reconciled"
            );
            Ok(CommandOutput::status(if report.is_success() { 0 } else { 1 }))
        }
    }
}

async fn lock_many(
    coordinator: &LeaseCoordinator,
    num: usize,
    machine_type: String,
    meta: MetadataArgs,
) -> anyhow::Result<CommandOutput> {
    let mut request = LeaseRequest::new(num, machine_type.clone());
    if let Some(desc) = &meta.desc {
        request = request.with_description(desc.clone());
    }

    let Acquisition {
        machine_type: won_type,
        nodes,
    } = coordinator.acquirer().acquire_many(&request).await?;
    let won_type = match won_type {
        Some(won_type) if !nodes.is_empty() => won_type,
        _ => {
            error!(count = num, machine_type = %machine_type, "No machines locked");
            return Ok(CommandOutput::status(1));
        }
    };
    let names: Vec<String> = nodes.keys().cloned().collect();

    // a compound request is judged by the alternative that won
    if !coordinator.context().is_virtual_type(&won_type) {
        let code = apply_metadata(coordinator, &names, &meta).await;
        let mut output = CommandOutput::print(TargetsDocument::from(nodes).to_yaml()?);
        output.exit_code = code;
        return Ok(output);
    }

    if nodes.len() < num {
        error!(
            wanted = num,
            got = nodes.len(),
            machine_type = %won_type,
            "Locking failed, releasing partial set"
        );
        let releaser = coordinator.releaser();
        for name in &names {
            if let Err(e) = releaser.release(name, None).await {
                error!(node = %name, error = %e, "Release failed");
            }
        }
        return Ok(CommandOutput::status(1));
    }

    let short_names: Vec<&str> = names.iter().map(|n| decanonicalize_hostname(n)).collect();
    info!(nodes = %short_names.join(" "), "Successfully locked");
    info!("Keys will be available once the virtual machines have booted; list them with --format targets");

    let code = apply_metadata(coordinator, &names, &meta).await;
    Ok(CommandOutput::status(code))
}

async fn list(coordinator: &LeaseCoordinator, args: ListArgs) -> anyhow::Result<CommandOutput> {
    let names = resolve_machines(coordinator, &args.machines)?;
    if args.all && !names.is_empty() {
        bail!("--all cannot be combined with specific machines");
    }

    let query = StatusQuery {
        names,
        machine_type: args.machine_type,
        owner: args.owner,
        status: args.status.map(NodeStatus::from),
        locked: args.locked,
        description: args.desc,
        description_contains: args.desc_pattern,
        all: args.all,
    };
    let nodes = coordinator.status().query(&query).await?;
    Ok(CommandOutput::print(render(&nodes, args.format.into())?))
}

/// Canonical names from the positional arguments followed by any targets file.
fn resolve_machines(
    coordinator: &LeaseCoordinator,
    args: &MachineArgs,
) -> anyhow::Result<Vec<String>> {
    let ctx = coordinator.context();
    let mut names: Vec<String> = args
        .machines
        .iter()
        .map(|m| canonicalize_hostname(m, Some(&ctx.ssh_user), &ctx.lab_domain))
        .collect();

    if let Some(path) = &args.targets {
        names.extend(read_targets_file(path)?);
    }
    Ok(names)
}

fn require_machines(names: &[String], operation: &str) -> anyhow::Result<()> {
    if names.is_empty() {
        bail!("{} needs machines or --targets", operation);
    }
    Ok(())
}

/// Apply `--desc`/`--status` to `names`; the exit code of the updates.
async fn apply_metadata(
    coordinator: &LeaseCoordinator,
    names: &[String],
    meta: &MetadataArgs,
) -> i32 {
    let update = meta.to_update();
    if update.is_empty() || names.is_empty() {
        return 0;
    }
    let outcome: BatchOutcome = coordinator.updater().update_names(names, &update).await;
    outcome.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use nodelock::{
        KeyWait, LockContext, MockLockService, MockProvisioner, NodeRecord, StaticKeyScan,
    };

    const OWNER: &str = "alice@laptop";

    fn coordinator(service: Arc<MockLockService>, provisioner: MockProvisioner) -> LeaseCoordinator {
        let ctx = LockContext::new("http://lock", OWNER)
            .with_lab_domain("lab")
            .with_key_wait(KeyWait {
                poll_interval: Duration::from_millis(5),
                timeout: Some(Duration::from_secs(1)),
            });
        LeaseCoordinator::new(
            ctx,
            service,
            Arc::new(provisioner),
            Arc::new(StaticKeyScan::new().with_key("vpm001.lab", "ssh-rsa V1")),
        )
    }

    fn machines(names: &[&str]) -> MachineArgs {
        MachineArgs {
            machines: names.iter().map(|s| s.to_string()).collect(),
            targets: None,
        }
    }

    fn vm(name: &str) -> NodeRecord {
        NodeRecord::new(name, "vps").on_vm_host("mira01")
    }

    #[tokio::test]
    async fn test_lock_canonicalizes_and_applies_description() {
        let service = Arc::new(MockLockService::new().with_node(NodeRecord::new("ubuntu@box1.lab", "plana")));
        let coordinator = coordinator(service.clone(), MockProvisioner::new());

        let output = execute_command(
            &coordinator,
            Commands::Lock {
                machines: machines(&["box1"]),
                force: false,
                owner: None,
                meta: MetadataArgs {
                    desc: Some("nightly".to_string()),
                    status: None,
                },
            },
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 0);
        let node = service.node("ubuntu@box1.lab").unwrap();
        assert_eq!(node.owner(), Some(OWNER));
        assert_eq!(node.description.as_deref(), Some("nightly"));
    }

    #[tokio::test]
    async fn test_lock_requires_machines() {
        let service = Arc::new(MockLockService::new());
        let coordinator = coordinator(service.clone(), MockProvisioner::new());

        let result = execute_command(
            &coordinator,
            Commands::Lock {
                machines: MachineArgs::default(),
                force: false,
                owner: None,
                meta: MetadataArgs::default(),
            },
        )
        .await;

        assert!(result.is_err());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unlock_force_reports_failure() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(NodeRecord::new("ubuntu@a.lab", "plana").locked_by("bob@desk"))
                .with_node(NodeRecord::new("ubuntu@b.lab", "plana").locked_by(OWNER)),
        );
        let coordinator = coordinator(service.clone(), MockProvisioner::new());

        let output = execute_command(
            &coordinator,
            Commands::Unlock {
                machines: machines(&["a", "b"]),
                force: true,
                owner: None,
                meta: MetadataArgs::default(),
            },
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 1);
        assert!(service.node("ubuntu@a.lab").unwrap().locked);
        assert!(!service.node("ubuntu@b.lab").unwrap().locked);
    }

    #[tokio::test]
    async fn test_lock_many_physical_prints_targets() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(NodeRecord::new("ubuntu@a.lab", "plana").with_key("ssh-rsa A"))
                .with_node(NodeRecord::new("ubuntu@b.lab", "plana").with_key("ssh-rsa B")),
        );
        let coordinator = coordinator(service, MockProvisioner::new());

        let output = execute_command(
            &coordinator,
            Commands::LockMany {
                num: 2,
                machine_type: "plana".to_string(),
                owner: None,
                meta: MetadataArgs::default(),
            },
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 0);
        let names = nodelock::targets::parse_targets(&output.stdout).unwrap();
        assert_eq!(names, vec!["ubuntu@a.lab", "ubuntu@b.lab"]);
    }

    #[tokio::test]
    async fn test_lock_many_vm_short_result_releases_everything() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(vm("ubuntu@vpm001.lab"))
                .with_node(vm("ubuntu@vpm002.lab")),
        );
        let coordinator = coordinator(
            service.clone(),
            MockProvisioner::new().with_failure("ubuntu@vpm002.lab"),
        );

        let output = execute_command(
            &coordinator,
            Commands::LockMany {
                num: 2,
                machine_type: "vps".to_string(),
                owner: None,
                meta: MetadataArgs::default(),
            },
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 1);
        assert!(!service.node("ubuntu@vpm001.lab").unwrap().locked);
        assert!(!service.node("ubuntu@vpm002.lab").unwrap().locked);
    }

    #[tokio::test]
    async fn test_lock_many_compound_type_won_by_vms() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(vm("ubuntu@vpm001.lab"))
                .with_node(vm("ubuntu@vpm002.lab"))
                .with_node(NodeRecord::new("ubuntu@a.lab", "plana"))
                .with_node(NodeRecord::new("ubuntu@b.lab", "plana")),
        );
        let coordinator = coordinator(
            service.clone(),
            MockProvisioner::new().with_failure("ubuntu@vpm002.lab"),
        );

        let output = execute_command(
            &coordinator,
            Commands::LockMany {
                num: 2,
                machine_type: "vps,plana".to_string(),
                owner: None,
                meta: MetadataArgs::default(),
            },
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 1);
        assert!(output.stdout.is_empty());
        assert!(!service.node("ubuntu@vpm001.lab").unwrap().locked);
        assert!(!service.node("ubuntu@vpm002.lab").unwrap().locked);
        assert_eq!(service.call_count("lock_many:plana"), 0);
    }

    #[derive(clap::Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_status_flag_rejects_unknown_values() {
        use clap::Parser;

        for bad in ["UP", "upp", "maybe"] {
            let parsed = TestCli::try_parse_from(["nodelock", "update", "a", "--status", bad]);
            assert!(parsed.is_err(), "{} should be rejected", bad);
        }
        assert!(TestCli::try_parse_from(["nodelock", "list", "--status", "sideways"]).is_err());

        let cli = TestCli::try_parse_from(["nodelock", "update", "a", "--status", "down"]).unwrap();
        match cli.command {
            Commands::Update { meta, .. } => {
                assert_eq!(meta.status, Some(StatusArg::Down));
                assert_eq!(meta.to_update().status, Some(NodeStatus::Down));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_needs_a_field() {
        let service = Arc::new(MockLockService::new().with_node(NodeRecord::new("ubuntu@a.lab", "plana")));
        let coordinator = coordinator(service.clone(), MockProvisioner::new());

        let result = execute_command(
            &coordinator,
            Commands::Update {
                machines: machines(&["a"]),
                meta: MetadataArgs::default(),
                ssh_pub_key: None,
            },
        )
        .await;
        assert!(result.is_err());
        assert!(service.calls().is_empty());

        let output = execute_command(
            &coordinator,
            Commands::Update {
                machines: machines(&["a"]),
                meta: MetadataArgs {
                    desc: None,
                    status: Some(StatusArg::Down),
                },
                ssh_pub_key: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(!service.node("ubuntu@a.lab").unwrap().up);
    }

    #[tokio::test]
    async fn test_list_with_targets_file() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(NodeRecord::new("ubuntu@a.lab", "plana").locked_by("bob@desk"))
                .with_node(NodeRecord::new("ubuntu@b.lab", "plana")),
        );
        let coordinator = coordinator(service, MockProvisioner::new());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "targets:\n  ubuntu@a.lab: ssh-rsa A").unwrap();

        let output = execute_command(
            &coordinator,
            Commands::List(ListArgs {
                machines: MachineArgs {
                    machines: Vec::new(),
                    targets: Some(file.path().to_path_buf()),
                },
                format: OutputFormat::Brief,
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(output.stdout, "a   locked bob@desk \"\"\n");
    }

    #[tokio::test]
    async fn test_list_defaults_to_own_machines() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(NodeRecord::new("ubuntu@a.lab", "plana").locked_by(OWNER))
                .with_node(NodeRecord::new("ubuntu@b.lab", "plana").locked_by("bob@desk")),
        );
        let coordinator = coordinator(service, MockProvisioner::new());

        let output = execute_command(
            &coordinator,
            Commands::List(ListArgs {
                format: OutputFormat::Targets,
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let names = nodelock::targets::parse_targets(&output.stdout).unwrap();
        assert_eq!(names, vec!["ubuntu@a.lab"]);
    }

    #[tokio::test]
    async fn test_bad_targets_file_fails_before_any_request() {
        let service = Arc::new(MockLockService::new());
        let coordinator = coordinator(service.clone(), MockProvisioner::new());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "targets: [not, a, mapping]").unwrap();

        let result = execute_command(
            &coordinator,
            Commands::Lock {
                machines: MachineArgs {
                    machines: Vec::new(),
                    targets: Some(file.path().to_path_buf()),
                },
                force: false,
                owner: None,
                meta: MetadataArgs::default(),
            },
        )
        .await;

        assert!(result.is_err());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_summary_table() {
        let service = Arc::new(
            MockLockService::new()
                .with_node(NodeRecord::new("ubuntu@a.lab", "plana").locked_by(OWNER))
                .with_node(NodeRecord::new("ubuntu@b.lab", "plana")),
        );
        let coordinator = coordinator(service, MockProvisioner::new());

        let output = execute_command(&coordinator, Commands::Summary { machine_type: None })
            .await
            .unwrap();
        assert!(output.stdout.starts_with("TYPE     COUNT  UP  OWNER\n"));
        assert!(output.stdout.contains(OWNER));
        assert!(output.stdout.contains("(free)"));
    }

    #[tokio::test]
    async fn test_update_keys_requires_selection() {
        let service = Arc::new(MockLockService::new().with_node(vm("ubuntu@vpm001.lab").with_key("OLD")));
        let coordinator = coordinator(service.clone(), MockProvisioner::new());

        let result = execute_command(
            &coordinator,
            Commands::UpdateKeys {
                machines: MachineArgs::default(),
                all: false,
            },
        )
        .await;
        assert!(result.is_err());

        let output = execute_command(
            &coordinator,
            Commands::UpdateKeys {
                machines: MachineArgs::default(),
                all: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(service.node("ubuntu@vpm001.lab").unwrap().pub_key(), "ssh-rsa V1");
    }
}
