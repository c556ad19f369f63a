use chrono::{DateTime, Utc};
use ptmuxd::client::Client;

pub fn run(client: &Client, json: bool) -> anyhow::Result<()> {
    let sessions = client.list_sessions()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    println!("ID\tNAME\tSTATUS\tSIZE\tCREATED_AT");
    for s in sessions.iter() {
        let status = if s.alive {
            "alive".to_string()
        } else {
            format!("exited({})", s.exit_code.unwrap_or(-1))
        };
        let created_at = DateTime::<Utc>::from(
            std::time::UNIX_EPOCH + std::time::Duration::from_millis(s.created_at as u64),
        );
        println!(
            "{}\t{}\t{}\t{}x{}\t{}",
            s.id,
            s.name,
            status,
            s.cols,
            s.rows,
            created_at.to_rfc3339()
        );
    }

    Ok(())
}
