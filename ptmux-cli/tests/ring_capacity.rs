use std::time::Duration;

use ptmuxd::client::CreateSessionParams;

mod support;

/// With a small configured history capacity, a single append larger than
/// the capacity leaves exactly the last `H` bytes the child emitted.
#[test]
fn history_is_truncated_to_configured_capacity() -> anyhow::Result<()> {
    let cfg_dir = tempfile::Builder::new().prefix("ptmux-cfg").tempdir()?;
    let cfg_path = cfg_dir.path().join("ptmux.toml");
    std::fs::write(&cfg_path, "history_bytes = 16\n")?;

    let daemon = support::DaemonProc::with_config(Some(&cfg_path))?;
    let client = daemon.client()?;

    let created = client.create_session(CreateSessionParams {
        name: "ring-cap".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/sh".into(), "-c".into(), "stty raw -echo; cat".into()]),
        env: None,
    })?;

    let data = b"abcdefghijklmnopqrstuvwxyz0123456789ABCD";
    client.write_input(&created.id, data)?;

    let history = support::wait_for(Duration::from_secs(3), || {
        let h = client.history(&created.id).ok()?;
        if h.len() == 16 {
            Some(h)
        } else {
            None
        }
    });

    assert_eq!(history, data[data.len() - 16..]);

    client.kill_session(&created.id, None)?;
    Ok(())
}

/// A zero-byte write is a no-op and never disturbs existing history.
#[test]
fn empty_write_does_not_change_history() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(CreateSessionParams {
        name: "empty-write".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/sh".into(), "-c".into(), "stty raw -echo; cat".into()]),
        env: None,
    })?;

    client.write_input(&created.id, b"x")?;
    let before = support::wait_for(Duration::from_secs(3), || {
        let h = client.history(&created.id).ok()?;
        if h == b"x" {
            Some(h)
        } else {
            None
        }
    });

    client.write_input(&created.id, b"")?;
    std::thread::sleep(Duration::from_millis(100));
    let after = client.history(&created.id)?;
    assert_eq!(before, after);

    client.kill_session(&created.id, None)?;
    Ok(())
}
