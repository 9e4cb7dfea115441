//! Line-oriented request loop for serve mode.
//!
//! Each input line holds one JSON [`Operation`]. Each produces exactly one
//! output line: `{"result": ...}` on success or `{"error": {"code", "message"}}`
//! on failure. Malformed lines are answered with an error and the loop keeps
//! going; blank lines are skipped. The loop ends at end of input.

use crate::commands::{execute, CommandError, Operation};
use order_core::OrderService;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Answers requests from `reader` on `writer` until end of input.
///
/// Returns the number of requests answered.
pub async fn serve<R, W>(service: &OrderService, reader: R, mut writer: W) -> std::io::Result<usize>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut lines = reader.lines();
	let mut answered = 0;

	while let Some(line) = lines.next_line().await? {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}

		let response = match serde_json::from_str::<Operation>(line) {
			Ok(operation) => respond(execute(service, operation).await),
			Err(e) => {
				tracing::debug!(error = %e, "Rejected malformed request");
				respond(Err(CommandError::Request(e)))
			},
		};

		let mut output = serde_json::to_vec(&response)?;
		output.push(b'\n');
		writer.write_all(&output).await?;
		writer.flush().await?;
		answered += 1;
	}

	Ok(answered)
}

fn respond(result: Result<Value, CommandError>) -> Value {
	match result {
		Ok(value) => json!({ "result": value }),
		Err(e) => json!({ "error": e.to_json() }),
	}
}
