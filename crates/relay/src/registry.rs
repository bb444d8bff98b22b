//! Raum-Registry – Welche Session ist unter welchem Namen in welchem Raum?
//!
//! Eine einzige registry-weite Sperre (`parking_lot::Mutex`) serialisiert
//! Raum-Erstellung, Ein-/Austragen, Sprechstatus-Aenderungen und
//! Momentaufnahmen. Dadurch sieht ein Broadcast nie einen halb
//! aktualisierten Raum.
//!
//! Die Sperre wird nie ueber ein `.await` gehalten. Unter der Sperre
//! findet keine IO statt, Sendevorgaenge arbeiten mit geklonten
//! `Arc<SessionHandle>`s.

use funkraum_core::types::{RoomId, SessionId, Username};
use funkraum_protocol::RoomState;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::session::SessionHandle;

// ---------------------------------------------------------------------------
// Interne Struktur
// ---------------------------------------------------------------------------

struct Mitglied {
    session: Arc<SessionHandle>,
    spricht: bool,
}

#[derive(Default)]
struct Raum {
    mitglieder: HashMap<Username, Mitglied>,
}

/// Sucht den Raum oder legt ihn an; `true` wenn neu erstellt
///
/// Nur mit gehaltener Registry-Sperre aufrufen.
fn holen_oder_erstellen<'a>(raeume: &'a mut HashMap<RoomId, Raum>, raum: &RoomId) -> (&'a mut Raum, bool) {
    match raeume.entry(raum.clone()) {
        Entry::Occupied(eintrag) => (eintrag.into_mut(), false),
        Entry::Vacant(eintrag) => (eintrag.insert(Raum::default()), true),
    }
}

/// Ein Raum-Mitglied als Sende-Ziel fuer den Broadcaster
#[derive(Clone)]
pub struct RaumMitglied {
    pub username: Username,
    pub session: Arc<SessionHandle>,
}

// ---------------------------------------------------------------------------
// RoomRegistry
// ---------------------------------------------------------------------------

/// Registry aller Raeume und ihrer Mitglieder
pub struct RoomRegistry {
    raeume: Mutex<HashMap<RoomId, Raum>>,
    /// Leere Raeume beim Austragen entfernen
    leere_raeume_entfernen: bool,
}

impl RoomRegistry {
    pub fn neu(leere_raeume_entfernen: bool) -> Self {
        Self {
            raeume: Mutex::new(HashMap::new()),
            leere_raeume_entfernen,
        }
    }

    /// Legt den Raum an, falls er noch nicht existiert
    ///
    /// Gibt `true` zurueck wenn der Raum neu erstellt wurde.
    pub fn raum_holen_oder_erstellen(&self, raum: &RoomId) -> bool {
        let mut raeume = self.raeume.lock();
        let (_, neu) = holen_oder_erstellen(&mut raeume, raum);
        neu
    }

    /// Traegt eine Session unter `username` in den Raum ein
    ///
    /// Pruefen und Eintragen passieren unter derselben Sperre: von zwei
    /// gleichzeitigen Anfragen fuer denselben Namen gewinnt genau eine.
    pub fn registrieren(
        &self,
        raum: &RoomId,
        username: &Username,
        session: Arc<SessionHandle>,
    ) -> Result<(), RegistryError> {
        if username.ist_leer() {
            return Err(RegistryError::UngueltigerName(
                "Benutzername darf nicht leer sein".into(),
            ));
        }
        if raum.ist_leer() {
            return Err(RegistryError::UngueltigerName(
                "Raum-ID darf nicht leer sein".into(),
            ));
        }

        let mut raeume = self.raeume.lock();
        let (eintrag, neu) = holen_oder_erstellen(&mut raeume, raum);
        if neu {
            tracing::debug!(raum = %raum, "Raum erstellt");
        }
        if eintrag.mitglieder.contains_key(username) {
            return Err(RegistryError::UsernameTaken {
                username: username.clone(),
                raum: raum.clone(),
            });
        }
        eintrag.mitglieder.insert(
            username.clone(),
            Mitglied {
                session,
                spricht: false,
            },
        );
        Ok(())
    }

    /// Entfernt `username` aus dem Raum (idempotent)
    pub fn abmelden(&self, raum: &RoomId, username: &Username) -> Option<Arc<SessionHandle>> {
        let mut raeume = self.raeume.lock();
        let entfernt = raeume
            .get_mut(raum)
            .and_then(|r| r.mitglieder.remove(username))
            .map(|m| m.session);
        self.aufraeumen(&mut raeume, raum);
        entfernt
    }

    /// Entfernt `username` nur, wenn der Eintrag noch zu `session_id` gehoert
    ///
    /// Eine beendete Session kann so nie eine neuere Session entfernen,
    /// die den Namen inzwischen uebernommen hat.
    pub fn abmelden_session(&self, raum: &RoomId, username: &Username, session_id: SessionId) -> bool {
        let mut raeume = self.raeume.lock();
        let Some(r) = raeume.get_mut(raum) else {
            return false;
        };
        let gehoert_session = r
            .mitglieder
            .get(username)
            .is_some_and(|m| m.session.id() == session_id);
        if gehoert_session {
            r.mitglieder.remove(username);
        }
        self.aufraeumen(&mut raeume, raum);
        gehoert_session
    }

    fn aufraeumen(&self, raeume: &mut HashMap<RoomId, Raum>, raum: &RoomId) {
        if self.leere_raeume_entfernen && raeume.get(raum).is_some_and(|r| r.mitglieder.is_empty()) {
            raeume.remove(raum);
            tracing::debug!(raum = %raum, "Leerer Raum entfernt");
        }
    }

    /// Setzt den Sprechstatus eines Mitglieds
    ///
    /// Gibt `false` zurueck wenn das Mitglied nicht (mehr) im Raum ist.
    pub fn sprechstatus_setzen(&self, raum: &RoomId, username: &Username, spricht: bool) -> bool {
        let mut raeume = self.raeume.lock();
        match raeume
            .get_mut(raum)
            .and_then(|r| r.mitglieder.get_mut(username))
        {
            Some(mitglied) => {
                mitglied.spricht = spricht;
                true
            }
            None => false,
        }
    }

    /// Konsistente Momentaufnahme: Benutzername -> spricht
    ///
    /// Unbekannte Raeume ergeben eine leere Aufnahme.
    pub fn momentaufnahme(&self, raum: &RoomId) -> RoomState {
        let raeume = self.raeume.lock();
        Self::status_von(raeume.get(raum))
    }

    /// Aktuelle Sende-Ziele eines Raums
    pub fn mitglieder(&self, raum: &RoomId) -> Vec<RaumMitglied> {
        let raeume = self.raeume.lock();
        Self::ziele_von(raeume.get(raum))
    }

    /// Momentaufnahme und Sende-Ziele aus demselben Sperr-Abschnitt
    pub fn status_und_mitglieder(&self, raum: &RoomId) -> (RoomState, Vec<RaumMitglied>) {
        let raeume = self.raeume.lock();
        let r = raeume.get(raum);
        (Self::status_von(r), Self::ziele_von(r))
    }

    fn status_von(raum: Option<&Raum>) -> RoomState {
        raum.map(|r| {
            r.mitglieder
                .iter()
                .map(|(name, m)| (name.clone(), m.spricht))
                .collect::<RoomState>()
        })
        .unwrap_or_default()
    }

    fn ziele_von(raum: Option<&Raum>) -> Vec<RaumMitglied> {
        raum.map(|r| {
            r.mitglieder
                .iter()
                .map(|(name, m)| RaumMitglied {
                    username: name.clone(),
                    session: Arc::clone(&m.session),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
    }

    pub fn raum_existiert(&self, raum: &RoomId) -> bool {
        self.raeume.lock().contains_key(raum)
    }

    pub fn raum_anzahl(&self) -> usize {
        self.raeume.lock().len()
    }

    /// Anzahl eingetragener Sessions ueber alle Raeume
    pub fn session_anzahl(&self) -> usize {
        self.raeume
            .lock()
            .values()
            .map(|r| r.mitglieder.len())
            .sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::neu(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use funkraum_protocol::FrameCodec;

    fn handle() -> Arc<SessionHandle> {
        SessionHandle::neu(
            "127.0.0.1:1".parse().unwrap(),
            tokio::io::sink(),
            FrameCodec::new(),
        )
    }

    fn raum(id: &str) -> RoomId {
        RoomId::from(id)
    }

    fn name(n: &str) -> Username {
        Username::from(n)
    }

    #[test]
    fn raum_wird_lazy_erstellt() {
        let registry = RoomRegistry::default();
        assert!(!registry.raum_existiert(&raum("lobby")));
        assert!(registry.raum_holen_oder_erstellen(&raum("lobby")));
        assert!(!registry.raum_holen_oder_erstellen(&raum("lobby")));
        assert_eq!(registry.raum_anzahl(), 1);
    }

    #[test]
    fn registrieren_legt_raum_an() {
        let registry = RoomRegistry::default();
        registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap();
        assert!(registry.raum_existiert(&raum("lobby")));
        assert_eq!(registry.session_anzahl(), 1);
    }

    #[test]
    fn doppelter_name_im_raum_abgelehnt() {
        let registry = RoomRegistry::default();
        registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap();
        let fehler = registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap_err();
        assert!(matches!(fehler, RegistryError::UsernameTaken { .. }));
    }

    #[test]
    fn gleicher_name_in_anderem_raum_erlaubt() {
        let registry = RoomRegistry::default();
        registry
            .registrieren(&raum("r1"), &name("A"), handle())
            .unwrap();
        registry
            .registrieren(&raum("r2"), &name("A"), handle())
            .unwrap();
        assert_eq!(registry.session_anzahl(), 2);
    }

    #[test]
    fn leere_namen_abgelehnt() {
        let registry = RoomRegistry::default();
        assert!(matches!(
            registry.registrieren(&raum("lobby"), &name(""), handle()),
            Err(RegistryError::UngueltigerName(_))
        ));
        assert!(matches!(
            registry.registrieren(&raum(""), &name("A"), handle()),
            Err(RegistryError::UngueltigerName(_))
        ));
        assert_eq!(registry.raum_anzahl(), 0);
    }

    #[test]
    fn abmelden_ist_idempotent() {
        let registry = RoomRegistry::default();
        registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap();
        assert!(registry.abmelden(&raum("lobby"), &name("A")).is_some());
        assert!(registry.abmelden(&raum("lobby"), &name("A")).is_none());
        assert!(registry.abmelden(&raum("gibtsnicht"), &name("A")).is_none());
        // Raum bleibt standardmaessig bestehen
        assert!(registry.raum_existiert(&raum("lobby")));
    }

    #[test]
    fn leere_raeume_optional_entfernt() {
        let registry = RoomRegistry::neu(true);
        registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap();
        registry.abmelden(&raum("lobby"), &name("A"));
        assert!(!registry.raum_existiert(&raum("lobby")));
    }

    #[test]
    fn abmelden_session_entfernt_keinen_nachfolger() {
        let registry = RoomRegistry::default();
        let alt = handle();
        let alt_id = alt.id();
        registry
            .registrieren(&raum("lobby"), &name("B"), alt)
            .unwrap();
        assert!(registry.abmelden_session(&raum("lobby"), &name("B"), alt_id));

        let neu = handle();
        registry
            .registrieren(&raum("lobby"), &name("B"), neu)
            .unwrap();
        // Verspaetetes Aufraeumen der alten Session
        assert!(!registry.abmelden_session(&raum("lobby"), &name("B"), alt_id));
        assert!(registry.momentaufnahme(&raum("lobby")).enthaelt("B"));
    }

    #[test]
    fn momentaufnahme_spiegelt_sprechstatus() {
        let registry = RoomRegistry::default();
        registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap();
        registry
            .registrieren(&raum("lobby"), &name("B"), handle())
            .unwrap();

        assert!(registry.sprechstatus_setzen(&raum("lobby"), &name("A"), true));
        let status = registry.momentaufnahme(&raum("lobby"));
        assert_eq!(status.spricht("A"), Some(true));
        assert_eq!(status.spricht("B"), Some(false));

        assert!(!registry.sprechstatus_setzen(&raum("lobby"), &name("X"), true));
    }

    #[test]
    fn momentaufnahme_unbekannter_raum_leer() {
        let registry = RoomRegistry::default();
        assert!(registry.momentaufnahme(&raum("nirgends")).is_empty());
        assert!(registry.mitglieder(&raum("nirgends")).is_empty());
    }

    #[test]
    fn gleichzeitige_registrierung_genau_ein_gewinner() {
        let registry = RoomRegistry::default();
        let erfolge = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if registry
                        .registrieren(&raum("lobby"), &name("A"), handle())
                        .is_ok()
                    {
                        erfolge.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(erfolge.into_inner(), 1);
        assert_eq!(registry.session_anzahl(), 1);
    }

    #[test]
    fn registrieren_nutzt_vorhandenen_raum() {
        let registry = RoomRegistry::default();
        assert!(registry.raum_holen_oder_erstellen(&raum("lobby")));
        registry
            .registrieren(&raum("lobby"), &name("A"), handle())
            .unwrap();
        assert!(!registry.raum_holen_oder_erstellen(&raum("lobby")));
        assert_eq!(registry.raum_anzahl(), 1);
        assert!(registry.momentaufnahme(&raum("lobby")).enthaelt("A"));
    }

    #[test]
    fn leerzeichen_namen_sind_erlaubt() {
        let registry = RoomRegistry::default();
        registry
            .registrieren(&raum(" "), &name(" "), handle())
            .unwrap();
        assert!(registry.momentaufnahme(&raum(" ")).enthaelt(" "));
    }
}
