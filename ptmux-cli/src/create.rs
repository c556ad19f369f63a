use ptmuxd::client::{Client, CreateSessionParams};

use crate::tty;

pub fn run(
    client: &Client,
    name: String,
    cols: Option<u16>,
    rows: Option<u16>,
    cwd: Option<String>,
    argv: Vec<String>,
    env: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let local_size = tty::Size::from_fd(0).unwrap_or(tty::Size { rows: 24, cols: 80 });

    let result = client.create_session(CreateSessionParams {
        name,
        cols: cols.unwrap_or(local_size.cols),
        rows: rows.unwrap_or(local_size.rows),
        cwd,
        argv: if argv.is_empty() { None } else { Some(argv) },
        env: if env.is_empty() { None } else { Some(env) },
    })?;

    println!("{}", result.id);
    Ok(())
}
