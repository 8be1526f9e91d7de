//! Side-by-side execution of the segment loads of one batch.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Apply `f` to every item. With the `parallel` feature, batches of more than one item run on
/// a private rayon pool sized like rayon's global one; without a pool they run in order.
/// Results keep the input order.
pub(crate) fn map_all<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    if items.len() > 1 {
        use rayon::prelude::*;

        static SEGMENT_LOADERS: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
        let loaders = SEGMENT_LOADERS.get_or_init(|| {
            rayon::ThreadPoolBuilder::new()
                .thread_name(|i| format!("olap-segment-{i}"))
                .build()
                .map_err(|err| log::warn!("no segment loader pool, loading in order: {err}"))
                .ok()
        });
        if let Some(pool) = loaders {
            return pool.install(|| items.par_iter().map(&f).collect());
        }
    }
    items.iter().map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn results_keep_input_order() {
        let items: Vec<u32> = (0..64).collect();
        assert_eq!(map_all(&items, |x| x * 2), (0..64).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn single_items_run_on_the_caller() {
        let caller = std::thread::current().id();
        assert_eq!(map_all(&[1], |_| std::thread::current().id()), vec![caller]);
    }
}
