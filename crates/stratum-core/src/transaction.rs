/// A first-class rollback journal.
///
/// Plan steps register their inverse right after each side effect; `commit`
/// disarms the journal. If the transaction is dropped uncommitted (error
/// return, cancellation, panic unwinding through the plan), the registered
/// steps run in reverse order, best-effort.
#[derive(Default)]
pub struct Transaction {
    steps: Vec<Box<dyn FnOnce() + Send>>,
    committed: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rollback(&mut self, step: impl FnOnce() + Send + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.steps.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for step in self.steps.drain(..).rev() {
            step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn committed_transaction_runs_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut txn = Transaction::new();
        let c = counter.clone();
        txn.add_rollback(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        txn.commit();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut txn = Transaction::new();
            for i in 0..3 {
                let order = order.clone();
                txn.add_rollback(move || order.lock().unwrap().push(i));
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn empty_transaction_is_harmless() {
        drop(Transaction::new());
        Transaction::new().commit();
    }
}
