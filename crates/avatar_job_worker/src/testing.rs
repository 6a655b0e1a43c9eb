//! In-memory fakes shared by handler and adapter tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::adapters::object_store::BlobStore;
use crate::adapters::process::{CommandSpec, ProcessExit, ProcessRunner};
use crate::config::WorkerConfig;

pub(crate) const TEST_BUCKET: &str = "vol-test";

/// Worker layout rooted in a temporary directory.
pub(crate) fn test_config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        workspace_dir: root.join("workspace"),
        weights_staging_dir: root.join("staging"),
        network_volume_weights_dir: root.join("volume/weights"),
        container_weights_dir: root.join("container/weights"),
        results_dir: root.join("results"),
        ..WorkerConfig::default()
    }
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_upload_suffix: Option<String>,
    fail_downloads: bool,
    upload_calls: Mutex<usize>,
    download_calls: Mutex<usize>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_uploads_for(mut self, suffix: &str) -> Self {
        self.failing_upload_suffix = Some(suffix.to_string());
        self
    }

    pub(crate) fn failing_downloads(mut self) -> Self {
        self.fail_downloads = true;
        self
    }

    pub(crate) fn seed_object(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .expect("objects lock")
            .insert(key.to_string(), body.to_vec());
    }

    pub(crate) fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("objects lock").get(key).cloned()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("objects lock")
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.list_keys(prefix)
    }

    pub(crate) fn upload_calls(&self) -> usize {
        *self.upload_calls.lock().expect("upload counter lock")
    }

    pub(crate) fn download_calls(&self) -> usize {
        *self.download_calls.lock().expect("download counter lock")
    }
}

impl BlobStore for RecordingStore {
    fn exists(&self, key: &str) -> bool {
        self.objects.lock().expect("objects lock").contains_key(key)
    }

    fn upload_file(&self, local_path: &Path, key: &str) -> bool {
        *self.upload_calls.lock().expect("upload counter lock") += 1;
        if self
            .failing_upload_suffix
            .as_deref()
            .is_some_and(|suffix| key.ends_with(suffix))
        {
            return false;
        }
        match fs::read(local_path) {
            Ok(body) => {
                self.seed_object(key, &body);
                true
            }
            Err(_) => false,
        }
    }

    fn download_file(&self, key: &str, local_path: &Path) -> bool {
        *self.download_calls.lock().expect("download counter lock") += 1;
        if self.fail_downloads {
            return false;
        }
        let Some(body) = self.object(key) else {
            return false;
        };
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).expect("create download parent");
        }
        fs::write(local_path, body).is_ok()
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .expect("objects lock")
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn delete(&self, key: &str) -> bool {
        self.objects
            .lock()
            .expect("objects lock")
            .remove(key)
            .is_some()
    }

    fn reference_url(&self, key: &str) -> String {
        format!("s3://{TEST_BUCKET}/{key}")
    }
}

type SideEffect = Box<dyn Fn(&CommandSpec) + Send + Sync>;

/// Records every command and answers with a fixed exit code after emitting
/// the configured output lines and running an optional side effect.
pub(crate) struct ScriptedRunner {
    exit_code: i32,
    launch_error: Option<String>,
    lines: Vec<String>,
    side_effect: Option<SideEffect>,
    commands: CommandLog,
}

impl ScriptedRunner {
    pub(crate) fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            launch_error: None,
            lines: Vec::new(),
            side_effect: None,
            commands: CommandLog::default(),
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::exiting_with(0)
    }

    pub(crate) fn failing_to_launch(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Self::succeeding()
        }
    }

    pub(crate) fn emitting(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    pub(crate) fn on_run(mut self, side_effect: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        self.side_effect = Some(Box::new(side_effect));
        self
    }

    pub(crate) fn commands(&self) -> Vec<CommandSpec> {
        self.commands.commands()
    }

    /// Handle that keeps reading recorded commands after the runner is boxed.
    pub(crate) fn command_log(&self) -> CommandLog {
        self.commands.clone()
    }
}

#[derive(Clone, Default)]
pub(crate) struct CommandLog(Arc<Mutex<Vec<CommandSpec>>>);

impl CommandLog {
    pub(crate) fn commands(&self) -> Vec<CommandSpec> {
        self.0.lock().expect("commands lock").clone()
    }

    fn record(&self, command: &CommandSpec) {
        self.0.lock().expect("commands lock").push(command.clone());
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        command: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, String> {
        self.commands.record(command);
        if let Some(message) = &self.launch_error {
            return Err(message.clone());
        }
        for line in &self.lines {
            on_line(line);
        }
        if let Some(side_effect) = &self.side_effect {
            side_effect(command);
        }
        Ok(ProcessExit {
            code: self.exit_code,
        })
    }
}
