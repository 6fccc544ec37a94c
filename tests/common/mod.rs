#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod gate {
    //! Lets a test hold a handler inside its invocation until released, so queue
    //! states can be reached by synchronization instead of sleeping.

    use may::sync::mpsc;
    use std::sync::{Arc, Mutex};

    /// Handler side: call [`Gate::pass`] from inside a handler
    pub struct Gate {
        entered_tx: Mutex<mpsc::Sender<()>>,
        release_rx: Mutex<mpsc::Receiver<()>>,
    }

    /// Test side: observe entry and release the handler
    pub struct GateControl {
        entered_rx: mpsc::Receiver<()>,
        release_tx: mpsc::Sender<()>,
    }

    pub fn gate() -> (Arc<Gate>, GateControl) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Arc::new(Gate {
                entered_tx: Mutex::new(entered_tx),
                release_rx: Mutex::new(release_rx),
            }),
            GateControl {
                entered_rx,
                release_tx,
            },
        )
    }

    impl Gate {
        /// Announce entry, then block until released
        pub fn pass(&self) {
            let _ = self.entered_tx.lock().unwrap().send(());
            let _ = self.release_rx.lock().unwrap().recv();
        }
    }

    impl GateControl {
        /// Block until a handler is parked in [`Gate::pass`]
        pub fn wait_entered(&self) {
            self.entered_rx.recv().expect("gate dropped before entry");
        }

        /// Let one parked handler continue
        pub fn release(&self) {
            self.release_tx.send(()).expect("gate dropped before release");
        }
    }
}
