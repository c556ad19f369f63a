use ptmuxd::client::Client;

pub fn run(client: &Client, id: String) -> anyhow::Result<()> {
    client.detach(&id)?;
    Ok(())
}
