use ptmuxd::client::Client;

pub fn run(client: &Client, id: String, cols: u16, rows: u16) -> anyhow::Result<()> {
    client.resize(&id, cols, rows)?;
    Ok(())
}
