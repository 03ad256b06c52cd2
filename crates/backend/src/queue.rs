//! Begrenzte Sende-Queue mit Drop-Oldest-Politik
//!
//! Das Routing von Frames darf nie auf Netzwerk-I/O warten. Ist die Queue
//! voll, wird der aelteste Eintrag verworfen und ein Verlustzaehler erhoeht
//! (Frische vor Vollstaendigkeit). Die Queue puffert auch Frames, die vor der
//! Handshake-Bestaetigung eintreffen.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Standard-Kapazitaet in Frames
pub const STANDARD_KAPAZITAET: usize = 256;

pub struct SendeQueue<T> {
    inner: Arc<SendeQueueInner<T>>,
}

struct SendeQueueInner<T> {
    eintraege: Mutex<VecDeque<T>>,
    kapazitaet: usize,
    verworfen: AtomicU64,
    geschlossen: AtomicBool,
    signal: Notify,
}

impl<T> Clone for SendeQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SendeQueue<T> {
    pub fn neu(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        Self {
            inner: Arc::new(SendeQueueInner {
                eintraege: Mutex::new(VecDeque::with_capacity(kapazitaet)),
                kapazitaet,
                verworfen: AtomicU64::new(0),
                geschlossen: AtomicBool::new(false),
                signal: Notify::new(),
            }),
        }
    }

    /// Reiht einen Eintrag ein, blockiert nie
    ///
    /// Gibt `false` zurueck wenn dafuer ein alter Eintrag verworfen wurde
    /// oder die Queue geschlossen ist.
    pub fn einreihen(&self, eintrag: T) -> bool {
        if self.inner.geschlossen.load(Ordering::Acquire) {
            return false;
        }
        let verlustfrei = {
            let mut q = self.inner.eintraege.lock();
            let verlustfrei = if q.len() >= self.inner.kapazitaet {
                q.pop_front();
                self.inner.verworfen.fetch_add(1, Ordering::Relaxed);
                false
            } else {
                true
            };
            q.push_back(eintrag);
            verlustfrei
        };
        self.inner.signal.notify_one();
        verlustfrei
    }

    /// Entnimmt den aeltesten Eintrag ohne zu warten
    pub fn entnehmen(&self) -> Option<T> {
        self.inner.eintraege.lock().pop_front()
    }

    /// Wartet auf den naechsten Eintrag
    ///
    /// Gibt `None` zurueck wenn die Queue geschlossen und leer ist.
    /// Abbruchsicher: ein Eintrag wird nur bei Rueckgabe entnommen.
    pub async fn naechstes(&self) -> Option<T> {
        loop {
            let benachrichtigt = self.inner.signal.notified();
            if let Some(eintrag) = self.entnehmen() {
                return Some(eintrag);
            }
            if self.inner.geschlossen.load(Ordering::Acquire) {
                return None;
            }
            benachrichtigt.await;
        }
    }

    /// Schliesst die Queue; verbleibende Eintraege koennen noch entnommen werden
    pub fn schliessen(&self) {
        self.inner.geschlossen.store(true, Ordering::Release);
        self.inner.signal.notify_waiters();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.inner.geschlossen.load(Ordering::Acquire)
    }

    pub fn laenge(&self) -> usize {
        self.inner.eintraege.lock().len()
    }

    pub fn kapazitaet(&self) -> usize {
        self.inner.kapazitaet
    }

    /// Anzahl der seit dem Start verworfenen Eintraege
    pub fn verworfen(&self) -> u64 {
        self.inner.verworfen.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drop_oldest_bei_ueberlauf() {
        let q = SendeQueue::neu(3);
        assert!(q.einreihen(1));
        assert!(q.einreihen(2));
        assert!(q.einreihen(3));
        assert!(!q.einreihen(4));
        assert!(!q.einreihen(5));

        assert_eq!(q.verworfen(), 2);
        assert_eq!(q.laenge(), 3);
        assert_eq!(q.entnehmen(), Some(3));
        assert_eq!(q.entnehmen(), Some(4));
        assert_eq!(q.entnehmen(), Some(5));
        assert_eq!(q.entnehmen(), None);
    }

    #[test]
    fn geschlossen_nimmt_nichts_an() {
        let q = SendeQueue::neu(3);
        q.einreihen("a");
        q.schliessen();
        assert!(!q.einreihen("b"));
        assert_eq!(q.laenge(), 1);
        assert_eq!(q.verworfen(), 0);
    }

    #[tokio::test]
    async fn naechstes_wartet_auf_eintrag() {
        let q = SendeQueue::neu(4);
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.naechstes().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.einreihen(42u32);
        assert_eq!(handle.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn naechstes_endet_nach_schliessen() {
        let q: SendeQueue<u8> = SendeQueue::neu(4);
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.naechstes().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.schliessen();
        assert_eq!(handle.await.unwrap(), None);
    }
}
