use std::{sync::mpsc, time::Duration};

use ptmuxd::client::CreateSessionParams;

mod support;

/// Two clients attached to the same session before any bytes arrive
/// receive byte-identical output.
#[test]
fn two_attached_clients_see_identical_output() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client_a = daemon.client()?;
    let client_b = daemon.client()?;

    let created = client_a.create_session(CreateSessionParams {
        name: "fanout".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/sh".into(), "-c".into(), "stty raw -echo; cat".into()]),
        env: None,
    })?;

    client_a.attach(&created.id)?;
    client_b.attach(&created.id)?;

    let (tx_a, rx_a) = mpsc::channel::<Vec<u8>>();
    let (tx_b, rx_b) = mpsc::channel::<Vec<u8>>();
    client_a.on_output(&created.id, move |bytes| {
        let _ = tx_a.send(bytes.to_vec());
    });
    client_b.on_output(&created.id, move |bytes| {
        let _ = tx_b.send(bytes.to_vec());
    });

    client_a.write_input(&created.id, b"ls\n")?;

    let got_a = rx_a.recv_timeout(Duration::from_secs(3)).expect("client a saw no output");
    let got_b = rx_b.recv_timeout(Duration::from_secs(3)).expect("client b saw no output");
    assert_eq!(got_a, got_b);
    assert!(got_a.starts_with(b"ls\n"), "output was {:?}", String::from_utf8_lossy(&got_a));

    client_a.kill_session(&created.id, None)?;
    Ok(())
}

/// The bell byte (0x07) in a session's output fans out a `bell` event to
/// every subscriber, in addition to the matching `output` event.
#[test]
fn bell_byte_triggers_a_bell_event() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(CreateSessionParams {
        name: "bell".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/sh".into(), "-c".into(), "stty raw -echo; cat".into()]),
        env: None,
    })?;

    client.attach(&created.id)?;
    let (bell_tx, bell_rx) = mpsc::channel::<()>();
    client.on_bell(&created.id, move || {
        let _ = bell_tx.send(());
    });

    client.write_input(&created.id, b"\x07")?;
    bell_rx.recv_timeout(Duration::from_secs(3)).expect("no bell event observed");

    client.kill_session(&created.id, None)?;
    Ok(())
}
