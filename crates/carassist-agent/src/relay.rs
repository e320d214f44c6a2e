//! Per-request hand-off queue between the generation worker and the
//! response consumer.
//!
//! One producer, one consumer, unbounded so the producer never blocks. The
//! producer enqueues [`RelayItem::End`] exactly once: explicitly through
//! [`RelayProducer::finish`] or implicitly when it is dropped, so the
//! consumer sees the sentinel even if the worker unwinds.
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayItem {
    Token(String),
    End,
}

pub fn relay_queue() -> (RelayProducer, RelayConsumer) {
    let (tx, rx) = unbounded_channel();
    (RelayProducer { tx: Some(tx) }, RelayConsumer { rx, ended: false })
}

pub struct RelayProducer {
    tx: Option<UnboundedSender<RelayItem>>,
}

impl RelayProducer {
    /// Enqueue a token. Returns `false` once the queue is finished or the
    /// consumer has gone away.
    pub fn put(&self, token: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(RelayItem::Token(token.into())).is_ok(),
            None => false,
        }
    }

    /// Enqueue the terminal sentinel. Later calls are no-ops.
    pub fn finish(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(RelayItem::End);
        }
    }

    pub fn is_finished(&self) -> bool { self.tx.is_none() }

    /// True when the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

impl Drop for RelayProducer {
    fn drop(&mut self) {
        self.finish();
    }
}

pub struct RelayConsumer {
    rx: UnboundedReceiver<RelayItem>,
    ended: bool,
}

impl RelayConsumer {
    /// Next item, waiting until one is available. After the sentinel every
    /// call returns `End` again.
    pub async fn get(&mut self) -> RelayItem {
        if self.ended {
            return RelayItem::End;
        }
        let item = self.rx.recv().await.unwrap_or(RelayItem::End);
        self.ended = item == RelayItem::End;
        item
    }

    /// Blocking variant of [`RelayConsumer::get`] for plain threads. Must not
    /// be called from inside an async runtime.
    pub fn blocking_get(&mut self) -> RelayItem {
        if self.ended {
            return RelayItem::End;
        }
        let item = self.rx.blocking_recv().unwrap_or(RelayItem::End);
        self.ended = item == RelayItem::End;
        item
    }

    pub fn is_ended(&self) -> bool { self.ended }
}
