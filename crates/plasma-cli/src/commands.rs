//! Interactive chat session.

use anyhow::{Context, Result};
use plasma_core::client::{
    connect, default_plugins, establish, leave_packet, spawn_receiver, ClientDispatcher,
    ClientEvent, TimeFormat, Update, CLIENT_FRAME_LIMIT,
};
use plasma_core::handshake::Handshake;
use plasma_core::session::{Session, SessionWriter};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Events buffered between the receiver task and the console.
const EVENT_BUFFER: usize = 64;

/// Print lines and send packets produced by the dispatcher.
async fn apply(update: Update, writer: &mut SessionWriter) -> Result<()> {
    for line in &update.lines {
        println!("{}", line);
    }
    for packet in &update.packets {
        writer
            .send_packet(packet)
            .await
            .context("Failed to send to server")?;
    }
    Ok(())
}

/// Connect, identify, then chat until Ctrl-C, end of input or disconnect.
pub async fn chat(
    host: &str,
    port: u16,
    name: &str,
    time_format: TimeFormat,
    workdir: PathBuf,
) -> Result<()> {
    let stream = connect(host, port)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
    let mut session = Session::new(stream);

    let handshake = Handshake::default().with_limit(CLIENT_FRAME_LIMIT);
    establish(&mut session, &handshake, name)
        .await
        .context("Failed to establish an encrypted session")?;
    tracing::info!(server = %format!("{}:{}", host, port), name = %name, "Connected");

    let (reader, mut writer) = session.split();
    let (tx, mut events) = mpsc::channel(EVENT_BUFFER);
    let receiver = spawn_receiver(reader, tx);

    let mut dispatcher = ClientDispatcher::new(default_plugins(workdir)?, time_format);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let result = loop {
        tokio::select! {
            line = input.next_line() => {
                match line.context("Failed to read input")? {
                    Some(line) => {
                        let update = dispatcher.handle_input(&line);
                        if let Err(e) = apply(update, &mut writer).await {
                            break Err(e);
                        }
                    }
                    None => break leave(&mut writer).await,
                }
            }
            event = events.recv() => {
                match event {
                    Some(ClientEvent::Packet(packet)) => match dispatcher.handle_packet(&packet) {
                        Ok(update) => {
                            if let Err(e) = apply(update, &mut writer).await {
                                break Err(e);
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, kind = %packet.kind, "Ignored packet"),
                    },
                    Some(ClientEvent::Closed(None)) | None => {
                        println!("Disconnected from server.");
                        break Ok(());
                    }
                    Some(ClientEvent::Closed(Some(e))) => {
                        break Err(anyhow::Error::new(e).context("Connection lost"));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break leave(&mut writer).await;
            }
        }
    };

    receiver.abort();
    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "Close failed");
    }
    result
}

async fn leave(writer: &mut SessionWriter) -> Result<()> {
    writer
        .send_packet(&leave_packet())
        .await
        .context("Failed to notify server")
}
