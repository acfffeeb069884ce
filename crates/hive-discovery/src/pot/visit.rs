//! Bounded concurrent neighbour visits.

use super::{Keyed, Pof, Pot};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Take `m` visits, drawing first on `extra` and then on `max`.
///
/// Returns the number of visits granted and the remaining `max` and `extra`.
fn need(m: isize, max: isize, extra: isize) -> (isize, isize, isize) {
    if m <= extra {
        return (m, max, extra - m);
    }
    let max = max + extra - m;
    if max <= 0 {
        return (m + max, 0, 0);
    }
    (m, max, 0)
}

impl<V> Pot<V>
where
    V: Keyed + Clone + Send + Sync + 'static,
{
    /// Call `f` on up to `max` values closest to `pivot`, each on a worker
    /// thread, skipping values closer than `max_po`.
    ///
    /// Each branch of the trie gets its own thread. A branch that needs fewer
    /// visits than it was offered hands the unused quota on to the branches
    /// visited after it, so the total approaches `max` without exceeding it.
    /// With `wait` the call returns once every dispatched visit has finished;
    /// otherwise the workers run detached.
    pub fn each_neighbour_async<P, F>(
        &self,
        pivot: &[u8],
        pof: &P,
        max: usize,
        max_po: usize,
        f: F,
        wait: bool,
    ) where
        P: Pof + ?Sized,
        F: Fn(&V, usize) + Send + Sync + 'static,
    {
        let max = max.min(self.size());
        let f = Arc::new(f);
        let mut workers = Vec::new();
        self.visit_async(pivot, pof, max as isize, max_po, &f, &mut workers);
        if wait {
            for worker in workers {
                if worker.join().is_err() {
                    tracing::warn!("neighbour visitor panicked");
                }
            }
        }
    }

    fn visit_async<P, F>(
        &self,
        pivot: &[u8],
        pof: &P,
        mut max: isize,
        max_po: usize,
        f: &Arc<F>,
        workers: &mut Vec<JoinHandle<()>>,
    ) -> isize
    where
        P: Pof + ?Sized,
        F: Fn(&V, usize) + Send + Sync + 'static,
    {
        let Some(pin) = self.pin() else {
            return max;
        };
        let bins = self.bins();
        let l = bins.len();

        let (po, eq) = pof.pof(pin.key(), pivot, self.po());
        // Too-close pins are cut off at max_po.
        let pom = po.min(max_po);
        let (sub, idx) = self.get_pos(pom);
        let mut left = idx;
        let mut right = idx as isize;
        let mut extra: isize = 0;

        if pom == po {
            match sub {
                Some(n) => {
                    let m = (n.size() as isize).min(max);
                    max -= m;
                    extra = n.visit_async(pivot, pof, m, max_po, f, workers);
                }
                None if !eq => right -= 1,
                None => {}
            }
        } else {
            // Skipped values release their share, never more than is left.
            if max > 0 {
                extra += 1;
                max -= 1;
            }
            if sub.is_some() {
                left += 1;
            }
            for s in bins[left.min(l)..].iter().rev() {
                let m = (s.size() as isize).min(max).max(0);
                max -= m;
                extra += m;
            }
        }

        if pom == po {
            let (m, mx, ex) = need(1, max, extra);
            max = mx;
            extra = ex;
            if m <= 0 {
                return extra;
            }
            let value = pin.clone();
            let g = Arc::clone(f);
            workers.push(thread::spawn(move || g(&value, po)));

            let start = ((right + 1).max(0) as usize).min(l);
            for n in bins[start..].iter().rev() {
                let (m, mx, ex) = need(n.size() as isize, max, extra);
                max = mx;
                extra = ex;
                if m <= 0 {
                    return extra;
                }
                workers.push(spawn_branch(n.clone(), m as usize, Some(po), f));
            }
        }

        for n in bins[..left.min(l)].iter().rev() {
            let (m, mx, ex) = need(n.size() as isize, max, extra);
            max = mx;
            extra = ex;
            if m <= 0 {
                return extra;
            }
            workers.push(spawn_branch(n.clone(), m as usize, None, f));
        }
        max + extra
    }
}

/// Visit up to `quota` values of `branch` on a new thread, reporting them at
/// `po` or, when `None`, at the branch's own order.
fn spawn_branch<V, F>(branch: Pot<V>, quota: usize, po: Option<usize>, f: &Arc<F>) -> JoinHandle<()>
where
    V: Send + Sync + 'static,
    F: Fn(&V, usize) + Send + Sync + 'static,
{
    let f = Arc::clone(f);
    thread::spawn(move || {
        let po = po.unwrap_or_else(|| branch.po());
        let mut left = quota;
        branch.each(|v| {
            f(v, po);
            left -= 1;
            left > 0
        });
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{build, pof8};
    use super::*;
    use std::sync::Mutex;

    fn visit(pot: &Pot<[u8; 1]>, pivot: u8, max: usize, max_po: usize) -> Vec<(u8, usize)> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        pot.each_neighbour_async(
            &[pivot],
            &pof8(),
            max,
            max_po,
            move |v: &[u8; 1], po| sink.lock().unwrap().push((v[0], po)),
            true,
        );
        let mut out = seen.lock().unwrap().clone();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_need_uses_extra_first() {
        assert_eq!(need(2, 5, 3), (2, 5, 1));
        assert_eq!(need(4, 5, 3), (4, 4, 0));
        assert_eq!(need(10, 5, 3), (8, 0, 0));
    }

    #[test]
    fn test_async_visits_all_when_quota_allows() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40, 0x41, 0xc0]);
        let seen = visit(&pot, 0x00, 100, 8);
        assert_eq!(seen.len(), pot.size());
    }

    #[test]
    fn test_async_respects_quota() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40, 0x41, 0xc0, 0x20, 0x10]);
        for max in 0..pot.size() {
            let seen = visit(&pot, 0x00, max, 8);
            assert!(seen.len() <= max, "visited {} > {max}", seen.len());
        }
    }

    #[test]
    fn test_async_reports_true_order() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40, 0x41, 0xc0]);
        let pof = pof8();
        for (v, po) in visit(&pot, 0x41, 100, 8) {
            assert_eq!(pof.pof(&[v], &[0x41], 0).0, po);
        }
    }

    #[test]
    fn test_async_prefers_closest() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40]);
        let seen = visit(&pot, 0x00, 2, 8);
        let values: Vec<u8> = seen.iter().map(|(v, _)| *v).collect();
        assert_eq!(values, vec![0x00, 0x01]);
    }

    #[test]
    fn test_async_skips_too_close() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40]);
        let seen = visit(&pot, 0x00, 4, 1);
        assert!(seen.iter().all(|(_, po)| *po <= 1), "{seen:?}");
    }
}
