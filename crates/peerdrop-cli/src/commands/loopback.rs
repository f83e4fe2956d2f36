//! Loopback command implementation.
//!
//! Drives one file through the complete transfer pipeline — chunking,
//! framing, backpressure, reassembly — between two sessions wired
//! back-to-back in this process, then verifies the received copy. Useful
//! for checking chunk-size settings and as a self-test of the transfer
//! engine without a peer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::time::timeout;

use peerdrop_core::file::format_size;
use peerdrop_core::protocol::ControlMessage;
use peerdrop_core::session::{Session, SessionEvent};
use peerdrop_core::transfer::TransferConfig;
use peerdrop_core::transport::{ChannelMessage, ChannelTransport};

use super::LoopbackArgs;

/// Run the loopback command.
pub async fn run(args: LoopbackArgs) -> Result<()> {
    if !args.file.is_file() {
        bail!("not a file: {}", args.file.display());
    }

    let config = TransferConfig {
        chunk_size: args.chunk_size,
        ..Default::default()
    };

    let ((transport_a, mut recv_a), (transport_b, mut recv_b)) =
        ChannelTransport::pair(config.buffer_low);

    let (mut sender, _sender_events) =
        Session::new(Arc::new(transport_a), config.clone()).context("sender session")?;
    let (mut receiver, mut receiver_events) =
        Session::new(Arc::new(transport_b), config).context("receiver session")?;

    sender.peer_joined();
    receiver.peer_joined();
    sender.queue_file(&args.file);

    let started = Instant::now();

    let pump = tokio::spawn(async move {
        while let Some(msg) = recv_b.recv().await {
            match msg {
                ChannelMessage::Binary(frame) => receiver.handle_binary(&frame),
                ChannelMessage::Control(msg) => receiver.handle_control(msg),
            }
        }
    });

    sender.send_queued().await.context("transfer failed")?;

    // The receive side acknowledges once reassembly finished; wait for that
    // so the timing covers the whole round trip.
    loop {
        let msg = timeout(Duration::from_secs(60), recv_a.recv())
            .await
            .context("timed out waiting for the receive side")?;
        match msg {
            Some(ChannelMessage::Control(msg @ ControlMessage::Downloaded { .. })) => {
                sender.handle_control(msg);
                break;
            }
            Some(_) => {}
            None => bail!("receive side went away"),
        }
    }
    let elapsed = started.elapsed();

    drop(sender);
    pump.await.context("receive pump")?;

    let mut received = None;
    while let Ok(event) = receiver_events.try_recv() {
        if let SessionEvent::FileReceived(file) = event {
            received = Some(file);
        }
    }
    let received = received.context("no file came out of the pipeline")?;

    let original = tokio::fs::read(&args.file)
        .await
        .context("re-reading input for verification")?;
    if received.bytes != original {
        bail!(
            "received copy differs from input ({} vs {} bytes)",
            received.bytes.len(),
            original.len()
        );
    }

    let output_dir = match args.output {
        Some(dir) => dir,
        None => args
            .file
            .parent()
            .map_or_else(|| std::path::PathBuf::from("."), std::path::Path::to_path_buf),
    };
    let output_path = output_dir.join(format!("{}.received", received.name));
    tokio::fs::write(&output_path, &received.bytes)
        .await
        .with_context(|| format!("writing {}", output_path.display()))?;

    let secs = elapsed.as_secs_f64().max(1e-3);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let throughput = (received.size as f64 / secs) as u64;

    println!("Transferred {} ({})", received.name, format_size(received.size));
    println!("  chunk size:  {}", format_size(args.chunk_size as u64));
    println!("  elapsed:     {elapsed:.2?}");
    println!("  throughput:  {}/s", format_size(throughput));
    println!("  verified:    received copy matches input");
    println!("  written to:  {}", output_path.display());

    Ok(())
}
