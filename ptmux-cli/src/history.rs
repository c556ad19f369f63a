use std::io::{self, Write};

use ptmuxd::client::Client;

pub fn run(client: &Client, id: String) -> anyhow::Result<()> {
    let snapshot = client.history(&id)?;
    io::stdout().write_all(&snapshot)?;
    io::stdout().flush()?;
    Ok(())
}
