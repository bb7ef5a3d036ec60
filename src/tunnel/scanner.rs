// 输出扫描器
//
// 增量匹配 ikec 的输出：未被匹配消费的字节保留在缓冲区中，供下一次扫描使用。
// 每一块输出在匹配前都会写入日志（target = "ikec"）。

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{patterns, MAX_SCAN_BUFFER};

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("protocol pattern must be a valid regex")
}

/// 站点配置加载成功
pub static CONFIG_LOADED: Lazy<Regex> = Lazy::new(|| compile(patterns::CONFIG_LOADED));
/// 站点配置加载失败
pub static FAILED_TO_LOAD: Lazy<Regex> = Lazy::new(|| compile(patterns::FAILED_TO_LOAD));
/// 隧道已建立
pub static TUNNEL_ENABLED: Lazy<Regex> = Lazy::new(|| compile(patterns::TUNNEL_ENABLED));
/// 与 key daemon 断开
pub static DETACHED: Lazy<Regex> = Lazy::new(|| compile(patterns::DETACHED));

/// 一次扫描的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// 超时
    Timeout,
    /// 匹配到第 n 个模式（从 0 开始）
    Matched(usize),
    /// 输出流已关闭（进程退出或被终止）
    Closed,
}

/// 输出扫描器
pub struct OutputScanner {
    output: mpsc::Receiver<String>,
    closed: CancellationToken,
    buffer: String,
    eof: bool,
}

impl OutputScanner {
    pub fn new(output: mpsc::Receiver<String>, closed: CancellationToken) -> Self {
        Self {
            output,
            closed,
            buffer: String::new(),
            eof: false,
        }
    }

    #[cfg(test)]
    fn pending(&self) -> &str {
        &self.buffer
    }

    /// 阻塞直到某个模式匹配、超时或输出流关闭
    ///
    /// 多个模式同时命中时取缓冲区中位置最靠前的，位置相同取编号小的。
    /// 命中后缓冲区中匹配结尾之前的内容被消费。
    pub async fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> ScanOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(index) = self.search(patterns) {
                return ScanOutcome::Matched(index);
            }
            if self.eof {
                return ScanOutcome::Closed;
            }

            tokio::select! {
                biased;
                _ = self.closed.cancelled() => {
                    self.eof = true;
                }
                chunk = self.output.recv() => match chunk {
                    Some(chunk) => self.push(chunk),
                    None => self.eof = true,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    return ScanOutcome::Timeout;
                }
            }
        }
    }

    fn search(&mut self, patterns: &[&Regex]) -> Option<usize> {
        let (index, end) = patterns
            .iter()
            .enumerate()
            .filter_map(|(i, re)| re.find(&self.buffer).map(|m| (m.start(), i, m.end())))
            .min_by_key(|&(start, i, _)| (start, i))
            .map(|(_, i, end)| (i, end))?;
        self.buffer.drain(..end);
        Some(index)
    }

    fn push(&mut self, chunk: String) {
        debug!(target: "ikec", "Ikec output: {}", chunk.trim_end());
        self.buffer.push_str(&chunk);
        if self.buffer.len() > MAX_SCAN_BUFFER {
            let mut cut = self.buffer.len() - MAX_SCAN_BUFFER;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> (OutputScanner, mpsc::Sender<String>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        (OutputScanner::new(rx, token.clone()), tx, token)
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_matches_pattern_index() {
        let (mut scanner, tx, _token) = scanner();
        tx.send(">> : failed to load 'site'\n".into()).await.unwrap();

        let outcome = scanner
            .expect(&[&*CONFIG_LOADED, &*FAILED_TO_LOAD], SHORT)
            .await;
        assert_eq!(outcome, ScanOutcome::Matched(1));
    }

    #[tokio::test]
    async fn test_timeout_keeps_buffered_output() {
        let (mut scanner, tx, _token) = scanner();
        tx.send("ii : ipc client process thread begin ...\n".into())
            .await
            .unwrap();

        let outcome = scanner.expect(&[&*TUNNEL_ENABLED, &*DETACHED], SHORT).await;
        assert_eq!(outcome, ScanOutcome::Timeout);
        // 超时不丢弃已缓冲的内容
        assert!(scanner.pending().contains("ipc client"));
    }

    #[tokio::test]
    async fn test_pattern_split_across_chunks() {
        let (mut scanner, tx, _token) = scanner();
        tx.send("ii : tunnel en".into()).await.unwrap();
        tx.send("abled\n".into()).await.unwrap();

        let outcome = scanner.expect(&[&*TUNNEL_ENABLED], SHORT).await;
        assert_eq!(outcome, ScanOutcome::Matched(0));
    }

    #[tokio::test]
    async fn test_incremental_scans_keep_remaining_bytes() {
        let (mut scanner, tx, _token) = scanner();
        tx.send("config loaded for site 'office'\nii : tunnel enabled\n".into())
            .await
            .unwrap();

        assert_eq!(
            scanner.expect(&[&*CONFIG_LOADED, &*FAILED_TO_LOAD], SHORT).await,
            ScanOutcome::Matched(0)
        );
        assert_eq!(
            scanner.expect(&[&*TUNNEL_ENABLED, &*DETACHED], SHORT).await,
            ScanOutcome::Matched(0)
        );
        // 已消费的内容不会被再次匹配
        assert_eq!(
            scanner.expect(&[&*TUNNEL_ENABLED], SHORT).await,
            ScanOutcome::Timeout
        );
    }

    #[tokio::test]
    async fn test_earliest_match_wins() {
        let (mut scanner, tx, _token) = scanner();
        tx.send("detached from key daemon\ntunnel enabled\n".into())
            .await
            .unwrap();

        assert_eq!(
            scanner.expect(&[&*TUNNEL_ENABLED, &*DETACHED], SHORT).await,
            ScanOutcome::Matched(1)
        );
        assert_eq!(
            scanner.expect(&[&*TUNNEL_ENABLED, &*DETACHED], SHORT).await,
            ScanOutcome::Matched(0)
        );
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let (mut scanner, tx, _token) = scanner();
        drop(tx);
        assert_eq!(
            scanner.expect(&[&*DETACHED], Duration::from_secs(5)).await,
            ScanOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_scan() {
        let (mut scanner, _tx, token) = scanner();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = scanner.expect(&[&*DETACHED], Duration::from_secs(10)).await;
        assert_eq!(outcome, ScanOutcome::Closed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_buffer_is_bounded() {
        let (mut scanner, tx, _token) = scanner();
        let noise = "x".repeat(MAX_SCAN_BUFFER);
        tx.send(noise.clone()).await.unwrap();
        tx.send(noise).await.unwrap();

        assert_eq!(
            scanner.expect(&[&*DETACHED], SHORT).await,
            ScanOutcome::Timeout
        );
        assert!(scanner.pending().len() <= MAX_SCAN_BUFFER);
    }
}
