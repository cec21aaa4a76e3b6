//! Server side of push: parse update-requests and push options, ingest the
//! incoming packfile, mutate references with per-command status, and report
//! back to the pusher.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::errors::GitError;
use crate::internal::pack::PackReader;
use crate::protocol::capability::{Capability, CapabilityList};
use crate::protocol::pktline::{self, Packet, PktReader};
use crate::protocol::request::{
    self, CommandAction, CommandOutcome, CommandStatusLine, RefCommand, ReportStatus,
};
use crate::protocol::sideband::{self, Muxer};
use crate::protocol::upload_pack::{ServeOptions, advertise_references};
use crate::protocol::Service;
use crate::reference::Reference;
use crate::storage::{
    ObjectStore as _, ReferenceStore as _, Storage, TransactionalStorage,
};

/// Serve one receive-pack exchange over the given byte channels.
pub fn receive_pack(
    storage: &Arc<dyn Storage>,
    r: &mut dyn Read,
    w: &mut dyn Write,
    opts: &ServeOptions,
) -> Result<(), GitError> {
    let version = opts.protocol_version()?;

    if opts.advertise_refs || !opts.stateless_rpc {
        advertise_references(
            storage.as_ref(),
            Service::ReceivePack,
            version,
            opts.advertise_refs && opts.stateless_rpc,
            w,
        )?;
        w.flush()?;
        if opts.advertise_refs {
            return Ok(());
        }
    }

    let mut packets = PktReader::new(r);
    match packets.peek_packet() {
        Err(GitError::IOError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(());
        }
        Err(e) => return Err(e),
        Ok(Packet::Flush) => return Ok(()),
        Ok(_) => {}
    }

    let (commands, caps) = request::decode_update_requests(&mut packets)?;
    if commands.is_empty() {
        return Ok(());
    }

    let push_options = if caps.supports(&Capability::PushOptions) {
        request::decode_push_options(&mut packets)?
    } else {
        Vec::new()
    };
    if !push_options.is_empty() {
        tracing::debug!(options = push_options.len(), "push options received");
    }

    // Everything after the update-requests (and options) section is raw
    // pack data.
    let report = apply_push(
        storage,
        &commands,
        caps.supports(&Capability::Atomic),
        packets.get_mut(),
    )?;

    if caps.supports(&Capability::ReportStatus) || caps.supports(&Capability::ReportStatusV2) {
        match sideband::negotiated_limit(&caps) {
            Some(frame_limit) => {
                let mut mux = Muxer::new(&mut *w, frame_limit);
                let mut report_bytes = Vec::new();
                report.encode(&mut report_bytes)?;
                mux.write_pack_data(&report_bytes)?;
                drop(mux);
                pktline::write_flush(w)?;
            }
            None => report.encode(w)?,
        }
    }
    w.flush()?;
    Ok(())
}

/// Ingest the pack (when the command mix needs one) and run every command
/// against the reference store, producing per-command status. With `atomic`,
/// commands run against a transactional overlay that only commits when every
/// one of them succeeded.
fn apply_push(
    storage: &Arc<dyn Storage>,
    commands: &[RefCommand],
    atomic: bool,
    pack: &mut dyn Read,
) -> Result<ReportStatus, GitError> {
    let needs_pack = commands
        .iter()
        .any(|c| matches!(c.action(), CommandAction::Create | CommandAction::Update));

    if atomic {
        let tx = TransactionalStorage::new(storage.clone());
        let report = ingest_and_apply(&tx, commands, needs_pack, pack)?;
        let all_ok = report.unpack_status == "ok"
            && report
                .command_statuses
                .iter()
                .all(|s| s.outcome == CommandOutcome::Ok);
        if all_ok {
            tx.commit()?;
            Ok(report)
        } else {
            tx.rollback()?;
            // All-or-nothing: every command reports failure.
            Ok(ReportStatus {
                unpack_status: report.unpack_status,
                command_statuses: commands
                    .iter()
                    .map(|c| CommandStatusLine {
                        reference: c.name.clone(),
                        outcome: CommandOutcome::Failed("atomic push failed".to_string()),
                    })
                    .collect(),
            })
        }
    } else {
        ingest_and_apply(storage.as_ref(), commands, needs_pack, pack)
    }
}

fn ingest_and_apply(
    storage: &dyn Storage,
    commands: &[RefCommand],
    needs_pack: bool,
    pack: &mut dyn Read,
) -> Result<ReportStatus, GitError> {
    let mut unpack_status = "ok".to_string();
    if needs_pack {
        match PackReader::new(storage.hash_kind(), pack).index_into(storage) {
            Ok((count, _)) => {
                tracing::debug!(objects = count, "push pack indexed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "push pack failed to index");
                unpack_status = e.to_string();
            }
        }
    }

    let mut command_statuses = Vec::with_capacity(commands.len());
    for command in commands {
        let outcome = if unpack_status != "ok" {
            CommandOutcome::Failed("unpacker error".to_string())
        } else {
            apply_command(storage, command)
        };
        if let CommandOutcome::Failed(reason) = &outcome {
            tracing::debug!(reference = %command.name, reason, "push command rejected");
        }
        command_statuses.push(CommandStatusLine {
            reference: command.name.clone(),
            outcome,
        });
    }

    Ok(ReportStatus {
        unpack_status,
        command_statuses,
    })
}

/// Staleness is enforced through the reference store's compare-and-swap: the
/// expected value is the hash reference named by the command's old id, so a
/// stale id and a symbolic reference occupying the name both fail the
/// full-value comparison. The existence probes only pick the report wording;
/// a concurrent mutation between probe and swap still ends in `ng`.
fn apply_command(storage: &dyn Storage, command: &RefCommand) -> CommandOutcome {
    match command.action() {
        CommandAction::Create => {
            if storage.reference(&command.name).is_ok() {
                return CommandOutcome::Failed("reference already exists".to_string());
            }
            let new_ref = Reference::hash(command.name.clone(), command.new);
            match storage.check_and_set_reference(&new_ref, None) {
                Ok(()) => CommandOutcome::Ok,
                Err(e) => CommandOutcome::Failed(e.to_string()),
            }
        }
        CommandAction::Delete => {
            if storage.reference(&command.name).is_err() {
                return CommandOutcome::Failed("reference does not exist".to_string());
            }
            let expected = Reference::hash(command.name.clone(), command.old);
            // Swapping the expected value onto itself verifies it before the
            // removal.
            match storage.check_and_set_reference(&expected, Some(&expected)) {
                Err(GitError::ReferenceHasChanged) => {
                    CommandOutcome::Failed("reference has changed".to_string())
                }
                Err(e) => CommandOutcome::Failed(e.to_string()),
                Ok(()) => match storage.remove_reference(&command.name) {
                    Ok(()) => CommandOutcome::Ok,
                    Err(e) => CommandOutcome::Failed(e.to_string()),
                },
            }
        }
        CommandAction::Update => {
            if storage.reference(&command.name).is_err() {
                return CommandOutcome::Failed("reference does not exist".to_string());
            }
            let expected = Reference::hash(command.name.clone(), command.old);
            let new_ref = Reference::hash(command.name.clone(), command.new);
            match storage.check_and_set_reference(&new_ref, Some(&expected)) {
                Ok(()) => CommandOutcome::Ok,
                Err(GitError::ReferenceHasChanged) => {
                    CommandOutcome::Failed("reference has changed".to_string())
                }
                Err(e) => CommandOutcome::Failed(e.to_string()),
            }
        }
        CommandAction::Invalid => CommandOutcome::Failed("invalid command".to_string()),
    }
}
