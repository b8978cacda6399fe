use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use safe_relocate::{
    BatchCoordinator, BookmarkStore, GrantKind, MemoryBookmarkStore, PathSanitizer,
    RelocationPolicy, Relocator,
};

use crate::error::{CliError, leaf};
use crate::input::{Plan, load_plan};
use crate::{Cli, Command, StoreKind};

pub(crate) fn run_with_policy(cli: &Cli, policy: RelocationPolicy) -> Result<(), CliError> {
    let value = execute_command(cli, policy)?;
    let out = crate::serialize_json(&value, cli.pretty)?;
    crate::write_stdout_line(&out)?;
    Ok(())
}

fn open_store(cli: &Cli) -> Arc<dyn BookmarkStore> {
    match cli.store {
        StoreKind::Keyring => Arc::new(safe_relocate::KeyringBookmarkStore::new(
            cli.keyring_service.clone(),
        )),
        StoreKind::Memory => Arc::new(MemoryBookmarkStore::new()),
    }
}

fn grant_kind(custom: bool) -> GrantKind {
    if custom {
        GrantKind::Custom
    } else {
        GrantKind::WellKnown
    }
}

pub(crate) fn execute_command(
    cli: &Cli,
    policy: RelocationPolicy,
) -> Result<serde_json::Value, CliError> {
    match &cli.command {
        Command::Sanitize { destination } => {
            policy.validate()?;
            let sanitized = PathSanitizer::new(policy.paths).sanitize(destination)?;
            Ok(serde_json::json!({
                "path": sanitized.to_string(),
                "components": sanitized.components(),
            }))
        }
        Command::Validate { source } => {
            let handle = safe_relocate::validate(source)?;
            Ok(serde_json::json!({
                "file": leaf(source),
                "kind": handle.kind(),
                "len": handle.len(),
                "identity": handle.identity(),
            }))
        }
        Command::Grant {
            key,
            folder,
            custom,
        } => {
            let relocator = Relocator::with_store(policy, open_store(cli))?;
            let record = relocator
                .broker()
                .grant_folder(key, folder, grant_kind(*custom))?;
            Ok(serde_json::json!({
                "key": record.key,
                "folder": leaf(folder),
                "custom": *custom,
            }))
        }
        Command::Revoke { key } => {
            let relocator = Relocator::with_store(policy, open_store(cli))?;
            let removed = relocator.broker().revoke(key)?;
            Ok(serde_json::json!({ "key": key, "removed": removed }))
        }
        Command::Run { plan } => {
            let plan = load_plan(plan)?;
            let relocator = Relocator::with_store(policy, open_store(cli))?;
            run_plan(relocator, plan)
        }
    }
}

pub(crate) fn run_plan(relocator: Relocator, plan: Plan) -> Result<serde_json::Value, CliError> {
    for grant in &plan.grants {
        relocator
            .broker()
            .grant_folder(&grant.key, &grant.folder, grant_kind(grant.custom))?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(safe_relocate::Error::Io)?;
    let coordinator = BatchCoordinator::new(Arc::new(relocator));
    let cancel = CancellationToken::new();

    let report = runtime.block_on(async {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current move");
                on_interrupt.cancel();
            }
        });
        coordinator.begin(plan.moves).run(&cancel).await
    });
    Ok(serde_json::to_value(report)?)
}
