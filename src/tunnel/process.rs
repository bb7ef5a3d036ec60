// ikec 进程管理
//
// 负责拉起 ikec、向其输入写命令、强制终止。
// ikec 运行在伪终端中：输出按行刷新，和交互式运行时一致。
// 进程输出由读取任务推入通道，只能通过绑定在同一进程上的 OutputScanner 消费。

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TunnelError;

/// 输出通道容量（以读取块计）
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
/// 单次读取的块大小
const READ_CHUNK_SIZE: usize = 4096;

/// 伪终端中运行的子进程
pub type ClientChild = Box<dyn portable_pty::Child + Send + Sync>;

/// 已拉起的客户端的各个部分
pub struct SpawnedClient {
    /// 子进程（测试中的脚本客户端没有真实进程）
    pub child: Option<ClientChild>,
    /// 进程输入
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    /// 进程输出块
    pub output: mpsc::Receiver<String>,
    /// 输入输出转发任务
    pub readers: Vec<JoinHandle<()>>,
}

/// 客户端启动器
#[async_trait]
pub trait ClientLauncher: Send + Sync {
    /// 以指定配置名拉起客户端
    async fn spawn(&self, profile: &str) -> Result<SpawnedClient, TunnelError>;
}

/// 真实的 ikec 启动器
pub struct IkecLauncher {
    binary: PathBuf,
}

impl IkecLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// 构建命令行参数，配置名原样作为 -r（resource）的值
    pub fn build_args(profile: &str) -> Vec<String> {
        vec!["-r".to_string(), profile.to_string()]
    }
}

#[async_trait]
impl ClientLauncher for IkecLauncher {
    async fn spawn(&self, profile: &str) -> Result<SpawnedClient, TunnelError> {
        let args = Self::build_args(profile);
        info!(
            "[Process] Starting ikec binary with {} {}",
            self.binary.display(),
            args.join(" ")
        );

        let pty_fault = |e: anyhow::Error| TunnelError::ProcessFault(format!("pty: {}", e));
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_fault)?;

        let mut cmd = CommandBuilder::new(&self.binary);
        cmd.args(&args);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TunnelError::Spawn {
                binary: self.binary.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;
        // 父进程不持有从端，子进程退出后主端读取才会结束
        drop(pair.slave);

        if let Some(pid) = child.process_id() {
            debug!("[Process] ikec running with pid {}", pid);
        }

        let reader = pair.master.try_clone_reader().map_err(pty_fault)?;
        let writer = pair.master.take_writer().map_err(pty_fault)?;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (input, input_task) = spawn_pty_writer(writer);
        let readers = vec![spawn_pty_reader(reader, tx), input_task];

        Ok(SpawnedClient {
            child: Some(child),
            input: Box::new(input),
            output: rx,
            readers,
        })
    }
}

/// 在阻塞线程中读取伪终端输出，读到结尾或接收端关闭时退出
fn spawn_pty_reader(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.blocking_send(chunk).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                // 从端全部关闭后 Linux 返回 EIO
                Err(e) => {
                    debug!("[Process] Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

/// 把异步输入转发到伪终端的同步写端
///
/// 返回的写端被释放后转发任务结束，伪终端写端随之关闭。
fn spawn_pty_writer(writer: Box<dyn Write + Send>) -> (tokio::io::DuplexStream, JoinHandle<()>) {
    let (input, mut feed) = tokio::io::duplex(READ_CHUNK_SIZE);
    let task = tokio::spawn(async move {
        let mut writer = writer;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = match feed.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let bytes = buf[..n].to_vec();
            let written = tokio::task::spawn_blocking(move || {
                writer.write_all(&bytes)?;
                writer.flush()?;
                Ok::<_, std::io::Error>(writer)
            })
            .await;
            writer = match written {
                Ok(Ok(writer)) => writer,
                Ok(Err(e)) => {
                    debug!("[Process] Input writer stopped: {}", e);
                    break;
                }
                Err(e) => {
                    warn!("[Process] Input writer task failed: {}", e);
                    break;
                }
            };
        }
    });
    (input, task)
}

/// 结束子进程并回收，kill 会先发 SIGHUP 再强制终止，期间阻塞
fn kill_and_reap(mut child: ClientChild) -> std::io::Result<portable_pty::ExitStatus> {
    if let Err(e) = child.kill() {
        debug!("[Process] Kill failed (already exited?): {}", e);
    }
    child.wait()
}

struct ProcessInner {
    child: Mutex<Option<ClientChild>>,
    input: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    readers: StdMutex<Vec<JoinHandle<()>>>,
    closed: CancellationToken,
}

impl Drop for ProcessInner {
    fn drop(&mut self) {
        // 未经 terminate 就释放时，不留下孤儿进程
        if let Some(child) = self.child.get_mut().take() {
            std::thread::spawn(move || {
                let _ = kill_and_reap(child);
            });
        }
    }
}

/// 进程句柄
///
/// 独占底层进程与伪终端。克隆只是共享同一个句柄，终止可以在任意任务中调用且可重复调用。
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl ProcessHandle {
    /// 接管已拉起的客户端，返回句柄与输出接收端
    pub fn new(client: SpawnedClient) -> (Self, mpsc::Receiver<String>) {
        let handle = Self {
            inner: Arc::new(ProcessInner {
                child: Mutex::new(client.child),
                input: Mutex::new(Some(client.input)),
                readers: StdMutex::new(client.readers),
                closed: CancellationToken::new(),
            }),
        };
        (handle, client.output)
    }

    /// 进程被终止时取消的令牌，扫描器据此解除阻塞
    pub fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// 向进程输入写一行
    pub async fn send_line(&self, text: &str) -> Result<(), TunnelError> {
        if self.is_terminated() {
            return Err(TunnelError::ProcessGone);
        }
        let mut input = self.inner.input.lock().await;
        let writer = input.as_mut().ok_or(TunnelError::ProcessGone)?;
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// 强制终止进程并释放资源
    pub async fn terminate(&self) {
        self.inner.closed.cancel();

        let child = self.inner.child.lock().await.take();
        if let Some(child) = child {
            match tokio::task::spawn_blocking(move || kill_and_reap(child)).await {
                Ok(Ok(status)) => debug!("[Process] ikec exited with code {}", status.exit_code()),
                Ok(Err(e)) => warn!("[Process] Failed to reap ikec: {}", e),
                Err(e) => warn!("[Process] Reaper task failed: {}", e),
            }
        }

        self.inner.input.lock().await.take();

        let readers = match self.inner.readers.lock() {
            Ok(mut readers) => std::mem::take(&mut *readers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for reader in readers {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::scanner::{OutputScanner, ScanOutcome, CONFIG_LOADED, FAILED_TO_LOAD};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn scripted_client() -> (SpawnedClient, mpsc::Sender<String>, tokio::io::DuplexStream) {
        let (tx, rx) = mpsc::channel(16);
        let (client_side, test_side) = tokio::io::duplex(1024);
        let client = SpawnedClient {
            child: None,
            input: Box::new(client_side),
            output: rx,
            readers: Vec::new(),
        };
        (client, tx, test_side)
    }

    /// 把一段 shell 脚本当作 ikec 使用（脚本忽略 -r 参数之外的内容）
    #[cfg(unix)]
    fn script_launcher(body: &str) -> (IkecLauncher, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("shrewguard-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("ikec");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (IkecLauncher::new(script), dir)
    }

    /// 读取输出直到出现指定文本，返回是否看到
    #[cfg(unix)]
    async fn wait_for_output(rx: &mut mpsc::Receiver<String>, needle: &str) -> bool {
        let mut seen = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !seen.contains(needle) {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => seen.push_str(&chunk),
                _ => return false,
            }
        }
        true
    }

    #[test]
    fn test_profile_is_passed_verbatim() {
        assert_eq!(
            IkecLauncher::build_args("office vpn \"main\""),
            vec!["-r".to_string(), "office vpn \"main\"".to_string()]
        );
    }

    #[tokio::test]
    async fn test_send_line_appends_terminator() {
        let (client, _tx, test_side) = scripted_client();
        let (handle, _rx) = ProcessHandle::new(client);

        handle.send_line("c").await.unwrap();

        let mut lines = BufReader::new(test_side).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (client, _tx, _test_side) = scripted_client();
        let (handle, _rx) = ProcessHandle::new(client);
        let token = handle.closed_token();

        handle.terminate().await;
        handle.terminate().await;

        assert!(token.is_cancelled());
        assert!(handle.is_terminated());
        assert!(matches!(
            handle.send_line("c").await,
            Err(TunnelError::ProcessGone)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let launcher = IkecLauncher::new("/nonexistent/ikec");
        let result = launcher.spawn("site").await;
        assert!(matches!(result, Err(TunnelError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_of_buffering_client_arrives_while_running() {
        // grep 写管道时整块缓冲，写终端时按行刷新；客户端在输出后继续运行
        let (launcher, dir) =
            script_launcher("{ echo \"ii : config loaded for site '$2'\"; sleep 3; } | grep config");
        let client = launcher.spawn("office").await.unwrap();
        let (handle, output) = ProcessHandle::new(client);
        let mut scanner = OutputScanner::new(output, handle.closed_token());

        let outcome = scanner
            .expect(&[&*CONFIG_LOADED, &*FAILED_TO_LOAD], Duration::from_secs(2))
            .await;
        assert_eq!(outcome, ScanOutcome::Matched(0));

        handle.terminate().await;
        let _ = std::fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_real_process() {
        // 用 cat 模拟一个一直等待输入的客户端
        let (launcher, dir) = script_launcher("exec cat");
        let client = launcher.spawn("office").await.unwrap();
        let (handle, mut rx) = ProcessHandle::new(client);

        handle.send_line("config loaded for site 'x'").await.unwrap();
        assert!(wait_for_output(&mut rx, "config loaded").await);

        handle.terminate().await;
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "output stream should close after terminate");
        let _ = std::fs::remove_dir_all(dir);
    }
}
