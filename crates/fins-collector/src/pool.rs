//! 동시 작업 수가 제한된 작업 큐.
//!
//! 항목을 `submit`으로 넣고 `drain`으로 전부 끝날 때까지 기다립니다.
//! 한 번에 실행되는 작업은 최대 `workers`개입니다.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// 제한된 워커 풀.
pub struct TaskQueue<R> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<R>,
    workers: usize,
}

impl<R: Send + 'static> TaskQueue<R> {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 대기 중이거나 실행 중인 작업 수.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 작업 추가. 허가를 얻을 때까지 실행이 미뤄집니다.
    pub fn submit<F>(&mut self, work: F)
    where
        F: Future<Output = R> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            // 세마포어는 닫지 않으므로 Err는 발생하지 않음
            let _permit = permits.acquire_owned().await.ok();
            work.await
        });
    }

    /// 모든 작업이 끝날 때까지 기다리고 결과를 완료 순서대로 반환합니다.
    ///
    /// 패닉한 작업은 에러 로그만 남기고 결과에서 빠집니다.
    pub async fn drain(mut self) -> Vec<R> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "작업 태스크 비정상 종료"),
            }
        }
        results
    }
}

/// 항목마다 `work`를 실행하고 결과를 모읍니다.
pub async fn run_all<T, R, F, Fut>(items: impl IntoIterator<Item = T>, workers: usize, work: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let mut queue = TaskQueue::new(workers);
    for item in items {
        queue.submit(work(item));
    }
    queue.drain().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_all(0..20usize, 3, |i| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(results.len(), 20);
        assert_eq!(results.iter().sum::<usize>(), (0..20).map(|i| i * 2).sum::<usize>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_is_dropped() {
        let mut queue = TaskQueue::new(2);
        queue.submit(async { 1 });
        let fail = true;
        queue.submit(async move {
            if fail {
                panic!("boom");
            }
            2
        });
        queue.submit(async { 3 });
        assert_eq!(queue.len(), 3);

        let mut results = queue.drain().await;
        results.sort();
        assert_eq!(results, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_zero_workers_still_progresses() {
        let queue: TaskQueue<()> = TaskQueue::new(0);
        assert_eq!(queue.workers(), 1);
        assert!(queue.is_empty());
        assert!(queue.drain().await.is_empty());
    }
}
