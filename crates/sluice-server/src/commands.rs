use std::process;

use sluice_core::clock::secs_to_nanos;
use sluice_core::{AdminError, AdminService, QueueService};

pub fn stats(admin: &AdminService, topic: &str, json: bool) -> Result<(), AdminError> {
    let stats = admin.topic_stats(topic)?;
    if json {
        match serde_json::to_string_pretty(&stats) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
        return Ok(());
    }

    println!("Topic: {}", stats.topic);
    println!("  ready:         {}", stats.ready);
    println!("  leased:        {}", stats.leased);
    println!("  done:          {}", stats.done);
    println!("  dead letters:  {}", stats.dead_letters);

    if !stats.ready_per_partition.is_empty() {
        println!();
        println!("  {:>9}  {:>7}", "PARTITION", "READY");
        for (partition, ready) in &stats.ready_per_partition {
            println!("  {partition:>9}  {ready:>7}");
        }
    }
    Ok(())
}

pub fn reclaim(admin: &AdminService, limit: usize) -> Result<(), AdminError> {
    let count = admin.reclaim_expired(limit)?;
    println!("Reclaimed {count} expired lease(s)");
    Ok(())
}

pub fn purge_done(
    admin: &AdminService,
    queue: &QueueService,
    topic: &str,
    older_than_secs: u64,
) -> Result<(), AdminError> {
    let before = queue
        .store()
        .now()
        .saturating_sub(secs_to_nanos(older_than_secs));
    let count = admin.purge_done(topic, before)?;
    println!("Purged {count} completed message(s) from \"{topic}\"");
    Ok(())
}

pub fn purge_dlq(admin: &AdminService, topic: &str) -> Result<(), AdminError> {
    let count = admin.purge_dead_letters(topic)?;
    if admin.dead_letter_settings().soft_delete {
        println!("Removed {count} dead letter(s) from \"{topic}\" (tombstoned)");
    } else {
        println!("Deleted {count} dead letter(s) from \"{topic}\"");
    }
    Ok(())
}

pub fn replay(admin: &AdminService, topic: &str, limit: usize) -> Result<(), AdminError> {
    let count = admin.replay_from_dead_letter(topic, limit)?;
    println!("Replayed {count} dead letter(s) into \"{topic}\"");
    Ok(())
}

pub fn dlq_list(admin: &AdminService, topic: &str, limit: usize) -> Result<(), AdminError> {
    let dead_letters = admin.list_dead_letters(topic, limit)?;
    if dead_letters.is_empty() {
        println!("No dead letters in \"{topic}\".");
        return Ok(());
    }

    println!(
        "{:>8}  {:>11}  {:>9}  {:>8}  REASON",
        "ID", "ORIGINAL_ID", "PARTITION", "ATTEMPTS"
    );
    for dl in &dead_letters {
        println!(
            "{:>8}  {:>11}  {:>9}  {:>8}  {}",
            dl.id, dl.original_id, dl.partition_id, dl.attempts, dl.reason
        );
    }
    Ok(())
}

pub fn dlq_replay(admin: &AdminService, id: u64) -> Result<(), AdminError> {
    let msg_id = admin.replay_dead_letter(id)?;
    println!("Replayed dead letter {id} as message {msg_id}");
    Ok(())
}

pub fn dlq_delete(admin: &AdminService, id: u64) -> Result<(), AdminError> {
    admin.delete_dead_letter(id)?;
    println!("Deleted dead letter {id}");
    Ok(())
}

/// Request errors end the process with a message; storage errors propagate.
pub fn exit_on_request_error(result: Result<(), AdminError>) -> Result<(), AdminError> {
    match result {
        Err(AdminError::DeadLetterNotFound(id)) => {
            eprintln!("Error: dead letter {id} does not exist");
            process::exit(1);
        }
        Err(AdminError::InvalidRequest(reason)) => {
            eprintln!("Error: {reason}");
            process::exit(1);
        }
        other => other,
    }
}
