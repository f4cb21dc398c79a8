//! One round of paced probes.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;

use super::{ProbeError, ProbeResult, Prober, RoundResult, slot_index};
use crate::transport::EchoHandle;

/// Launches `samples` probes spaced by `spacing` and waits for all of them.
///
/// Sequence numbers come from a counter shared with the engine, so they stay
/// unique across rounds. Results are placed by sequence number, not by
/// completion order.
#[derive(Debug, Clone)]
pub struct ProbeRound {
    prober: Prober,
    sequence: Arc<AtomicU64>,
    samples: NonZeroUsize,
    spacing: Duration,
}

impl ProbeRound {
    pub fn new(
        handle: Arc<dyn EchoHandle>,
        sequence: Arc<AtomicU64>,
        samples: NonZeroUsize,
        spacing: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            prober: Prober::new(handle, timeout),
            sequence,
            samples,
            spacing,
        }
    }

    pub fn samples(&self) -> usize {
        self.samples.get()
    }

    /// Run the round to completion.
    ///
    /// Never returns a partial round. Dropping the future aborts the probes
    /// still in flight.
    pub async fn run(&self) -> RoundResult {
        let samples = self.samples.get();
        let timestamp = Utc::now();
        let mut probes = JoinSet::new();
        let mut launched = Vec::with_capacity(samples);

        for i in 0..samples {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            launched.push(seq);
            let prober = self.prober.clone();
            probes.spawn(async move { prober.probe(seq).await });

            if i + 1 < samples && !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }
        }

        let mut slots: Vec<Option<ProbeResult>> = vec![None; samples];
        let mut failure = None;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => {
                    let idx = slot_index(result.sequence(), samples);
                    if slots[idx].is_some() {
                        tracing::warn!(
                            seq = result.sequence(),
                            slot = idx,
                            "Duplicate probe result"
                        );
                    }
                    slots[idx] = Some(result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Probe task failed");
                    failure = Some(e.to_string());
                }
            }
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    let seq = launched
                        .iter()
                        .copied()
                        .find(|seq| slot_index(*seq, samples) == idx)
                        .unwrap_or_default();
                    let cause = failure.as_deref().unwrap_or("no result");
                    ProbeResult::error(seq, ProbeError::Read(format!("probe task failed: {cause}")))
                })
            })
            .collect();

        RoundResult::new(timestamp, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeState;
    use crate::transport::mock::{Script, ScriptedHandle};
    use rand::Rng;

    fn round(handle: Arc<ScriptedHandle>, samples: usize, spacing: Duration) -> ProbeRound {
        ProbeRound::new(
            handle,
            Arc::new(AtomicU64::new(0)),
            NonZeroUsize::new(samples).unwrap(),
            spacing,
            Duration::from_secs(3),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_all_lost() {
        let result = round(ScriptedHandle::silent(), 3, Duration::ZERO).run().await;

        assert_eq!(result.len(), 3);
        for probe in result.results() {
            assert_eq!(probe.state(), ProbeState::Lost);
            assert_eq!(probe.latency(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_sample_success() {
        let result = round(ScriptedHandle::echo(Duration::from_millis(10)), 1, Duration::ZERO)
            .run()
            .await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.results()[0].state(), ProbeState::Success);
        assert_eq!(result.results()[0].sequence(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_keep_every_slot() {
        let handle = ScriptedHandle::new(|seq| match seq % 3 {
            0 => Script::Silent,
            1 => Script::reply_after(Duration::from_millis(30)),
            _ => Script::TransmitFail("no route to host".into()),
        });
        let result = round(handle, 6, Duration::ZERO).run().await;

        assert_eq!(result.len(), 6);
        assert_eq!(result.count(ProbeState::Success), 2);
        assert_eq!(result.count(ProbeState::Lost), 2);
        assert_eq!(result.count(ProbeState::Error), 2);
        for (idx, probe) in result.results().iter().enumerate() {
            assert_eq!(probe.sequence(), idx as u64 + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_completion_lands_in_sequence_slot() {
        const SAMPLES: usize = 8;
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..20 {
            let delays: Vec<u64> = {
                let mut rng = rand::thread_rng();
                (0..SAMPLES).map(|_| rng.gen_range(0..500)).collect()
            };
            let handle = ScriptedHandle::new(move |seq| {
                Script::reply_after(Duration::from_millis(delays[slot_index(seq, SAMPLES)]))
            });
            let round = ProbeRound::new(
                handle,
                Arc::clone(&counter),
                NonZeroUsize::new(SAMPLES).unwrap(),
                Duration::from_millis(1),
                Duration::from_secs(3),
            );

            let result = round.run().await;
            assert_eq!(result.len(), SAMPLES);
            let first = result.results()[0].sequence();
            for (idx, probe) in result.results().iter().enumerate() {
                assert_eq!(probe.state(), ProbeState::Success);
                assert_eq!(slot_index(probe.sequence(), SAMPLES), idx);
                assert_eq!(probe.sequence(), first + idx as u64);
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 20 * SAMPLES as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_are_paced_by_spacing() {
        let handle = ScriptedHandle::echo(Duration::from_millis(1));
        let start = tokio::time::Instant::now();
        let result = round(Arc::clone(&handle), 4, Duration::from_millis(100))
            .run()
            .await;

        assert_eq!(result.count(ProbeState::Success), 4);
        assert_eq!(handle.transmitted(), vec![1, 2, 3, 4]);
        // Three gaps between four launches, no sleep after the last one.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }
}
