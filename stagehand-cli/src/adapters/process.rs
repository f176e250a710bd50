use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

#[cfg(unix)]
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;

use stagehand_core::adapter::{StartAction, StartError};
use stagehand_core::graph::Resource;
use stagehand_core::model::{Environment, LaunchSpec, ResourceId};

/// How long a process group gets between SIGTERM and SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(5);

struct ProcessHandle {
    child: Child,
    pgid: i32,
}

/// Runs project resources as local shell commands, one process group each
#[derive(Default)]
pub struct ProcessStarter {
    processes: Mutex<BTreeMap<ResourceId, ProcessHandle>>,
}

impl ProcessStarter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn forward_output(id: ResourceId, stream: &'static str, reader: impl AsyncRead + Unpin + Send + 'static) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "stagehand::output", resource = %id, stream, "{}", line);
        }
    });
}

#[async_trait]
impl StartAction for ProcessStarter {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn start(&self, resource: &Resource, env: &Environment) -> Result<(), StartError> {
        let Some(LaunchSpec::Process { command, cwd }) = &resource.launch else {
            return Err(StartError::NothingToLaunch {
                id: resource.id.clone(),
            });
        };
        if command.trim().is_empty() {
            return Err(StartError::NothingToLaunch {
                id: resource.id.clone(),
            });
        }

        let mut processes = self.processes.lock().await;
        if let Some(handle) = processes.get_mut(&resource.id) {
            if handle.child.try_wait().ok().flatten().is_none() {
                tracing::debug!(resource = %resource.id, "process already running");
                return Ok(());
            }
        }

        #[cfg(unix)]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.arg("-c");
            c.arg(command);
            c
        };
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        };

        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in env {
            cmd.env(key, value.expose());
        }
        if let Some(port) = resource.endpoint.as_ref().and_then(|e| e.port) {
            cmd.env("PORT", port.to_string());
        }

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| StartError::LaunchFailed {
            id: resource.id.clone(),
            message: e.to_string(),
        })?;
        let pgid = child.id().map(|pid| pid as i32).unwrap_or(-1);
        tracing::info!(resource = %resource.id, pid = pgid, "process spawned");

        if let Some(stdout) = child.stdout.take() {
            forward_output(resource.id.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(resource.id.clone(), "stderr", stderr);
        }

        processes.insert(resource.id.clone(), ProcessHandle { child, pgid });
        Ok(())
    }

    async fn stop(&self, resource: &Resource) -> Result<(), StartError> {
        let Some(mut handle) = self.processes.lock().await.remove(&resource.id) else {
            return Ok(());
        };

        #[cfg(unix)]
        if handle.pgid > 0 {
            unsafe {
                libc::killpg(handle.pgid, libc::SIGTERM);
            }
            if tokio::time::timeout(STOP_GRACE, handle.child.wait()).await.is_err() {
                tracing::warn!(resource = %resource.id, "process ignored SIGTERM, killing");
                unsafe {
                    libc::killpg(handle.pgid, libc::SIGKILL);
                }
            }
            return Ok(());
        }

        handle
            .child
            .kill()
            .await
            .map_err(|e| StartError::StopFailed {
                id: resource.id.clone(),
                message: e.to_string(),
            })
    }
}
