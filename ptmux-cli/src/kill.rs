use ptmuxd::client::Client;

pub fn run(client: &Client, id: String, signal: Option<String>) -> anyhow::Result<()> {
    client.kill_session(&id, signal)?;
    Ok(())
}
