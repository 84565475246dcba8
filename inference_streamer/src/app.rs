use crate::config::{Config, StreamConfig};
use crate::telemetry::Metrics;

use bytes::Bytes;
use inference_client::{api, Client, ClientError, ClientSettings, ModelInfo, ModelQuery};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("AI server request failed: {0}")]
    Client(#[from] ClientError),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("Model {0} is not available on the AI server")]
    ModelNotFound(String),
    #[error("No frames found in {0}")]
    NoFrames(String),
    #[error("Failed to read frames: {0}")]
    Frames(#[from] std::io::Error),
    #[error("Inference session stopped: {0}")]
    Session(String),
}

/// Connect, pick the configured model and push every frame of the frames
/// directory through the pipelined stream.
pub fn start_app(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let mut client = get_client(
        &config.server.get_address(),
        &config.client,
        config.stream.connect_retries,
    )?;

    if !client.ping() {
        tracing::warn!("AI server did not answer ping, continuing anyway");
    }

    let model = select_model(&mut client, &config.stream.model_name)?;
    tracing::info!(
        model = %model.name,
        device = %model.device_type,
        runtime = %model.runtime_agent,
        "Using model"
    );
    match client.label_dictionary(&model.name) {
        Ok(Value::Object(labels)) => tracing::info!("Model knows {} labels", labels.len()),
        Ok(_) => tracing::debug!("Model has no label dictionary"),
        Err(e) => tracing::warn!("Failed to fetch label dictionary: {}", e),
    }

    let frames = collect_frames(Path::new(&config.stream.frames_dir))?;
    let outcome = stream_frames(&mut client, &model.name, &config.stream, &frames, &metrics);

    match metrics.encode() {
        Ok(text) => tracing::info!(metrics = %text, "Run complete"),
        Err(e) => tracing::warn!("Failed to encode metrics: {}", e),
    }
    outcome?;
    Ok(())
}

fn get_client(
    address: &str,
    settings: &ClientSettings,
    max_retries: u32,
) -> Result<Client, AppError> {
    let mut retry_delay = Duration::from_millis(50);
    let max_retry_delay = Duration::from_secs(1);
    let mut retry_count = 0;

    while retry_count < max_retries {
        match Client::with_settings(address, settings.clone()) {
            Ok(client) => return Ok(client),
            Err(e @ ClientError::InvalidAddress(_)) => return Err(e.into()),
            Err(e) => {
                tracing::error!("Failed to connect to AI server {}: {}", address, e);
            }
        }

        retry_count += 1;
        let jitter = rand::random::<f32>() * 0.2 + 0.9;
        sleep(retry_delay.mul_f32(jitter));
        retry_delay = (retry_delay * 2).min(max_retry_delay);
    }

    Err(AppError::MaxRetriesExceeded)
}

/// Exact name match first, then the first zoo entry containing the name.
fn select_model(client: &mut Client, model_name: &str) -> Result<ModelInfo, AppError> {
    let models = client.model_zoo_list()?;
    models
        .iter()
        .find(|model| model.name == model_name)
        .or_else(|| ModelQuery::by_name(model_name).find(&models))
        .cloned()
        .ok_or_else(|| AppError::ModelNotFound(model_name.to_string()))
}

/// Regular files of `dir`, sorted by file name.
fn collect_frames(dir: &Path) -> Result<Vec<(String, PathBuf)>, AppError> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            frames.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    if frames.is_empty() {
        return Err(AppError::NoFrames(dir.display().to_string()));
    }
    frames.sort();
    Ok(frames)
}

#[instrument(skip(client, stream_config, frames, metrics), fields(frames = frames.len()))]
fn stream_frames(
    client: &mut Client,
    model_name: &str,
    stream_config: &StreamConfig,
    frames: &[(String, PathBuf)],
    metrics: &Arc<Metrics>,
) -> Result<(), AppError> {
    client.open_stream(model_name, stream_config.queue_depth, &stream_config.model_params)?;

    let sent_at: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
    {
        let sent_at = Arc::clone(&sent_at);
        let metrics = Arc::clone(metrics);
        let model = model_name.to_string();
        client.result_observe(move |result, frame_info| {
            let latency_ms = sent_at
                .lock()
                .remove(frame_info)
                .map(|start| start.elapsed().as_millis() as u64)
                .unwrap_or_default();

            match api::error_check(result) {
                Some(msg) => {
                    metrics.record_result(&model, "error", latency_ms);
                    tracing::warn!(frame = frame_info, "Inference failed: {}", msg);
                }
                None => {
                    metrics.record_result(&model, "ok", latency_ms);
                    let detections = result
                        .get("result")
                        .and_then(Value::as_array)
                        .map(Vec::len)
                        .unwrap_or_default();
                    tracing::info!(frame = frame_info, latency_ms, detections, "Result received");
                }
            }
        })?;
    }

    for (name, path) in frames {
        if client.last_error().is_some() {
            break;
        }
        let data = std::fs::read(path)?;
        sent_at.lock().insert(name.clone(), Instant::now());
        client.send(&[Bytes::from(data)], name)?;
        metrics.record_frame_sent(model_name);
    }

    client.drain();
    tracing::info!(outstanding = client.outstanding_count(), "Stream drained");
    let session_error = client.last_error();
    client.close_stream();

    match session_error {
        Some(error) => Err(AppError::Session(error)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collect_frames_sorted_by_name() {
        let dir = std::env::temp_dir().join(format!("inference_streamer_{}", std::process::id()));
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("b.jpg"), b"b").unwrap();
        fs::write(dir.join("a.jpg"), b"a").unwrap();

        let frames = collect_frames(&dir).unwrap();
        let names: Vec<&str> = frames.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["a.jpg", "b.jpg"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_collect_frames_rejects_empty_dir() {
        let dir = std::env::temp_dir().join(format!("inference_streamer_empty_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        assert!(matches!(collect_frames(&dir), Err(AppError::NoFrames(_))));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_address_is_not_retried() {
        let started = Instant::now();
        let result = get_client("bad:address:", &ClientSettings::default(), 10);
        assert!(matches!(result, Err(AppError::Client(ClientError::InvalidAddress(_)))));
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
