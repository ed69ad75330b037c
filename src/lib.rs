pub mod config;
pub mod envelope;
pub mod errors;
pub mod platform;
pub mod scene;
pub mod signature;
pub mod token;
pub mod users;
pub mod web_api;

pub use config::Config;
pub use envelope::{extract_scan, parse_envelope, Envelope};
pub use errors::{ErrorCode, ServiceError};
pub use scene::{SceneSession, SceneState, SceneStore};
pub use signature::{expected_signature, verify_signature};
pub use users::{User, UserDirectory};

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::envelope::{extract_scan, parse_envelope};
    use crate::scene::{SceneState, SceneStore};
    use crate::users::UserDirectory;

    const TTL: Duration = Duration::from_secs(600);

    fn subscribe_xml(scene_id: &str, identity: &str) -> String {
        format!(
            "<xml>\
             <FromUserName><![CDATA[{identity}]]></FromUserName>\
             <MsgType><![CDATA[event]]></MsgType>\
             <Event><![CDATA[subscribe]]></Event>\
             <EventKey><![CDATA[qrscene_{scene_id}]]></EventKey>\
             </xml>"
        )
    }

    #[test]
    fn envelope_drives_scene_store_transition() {
        let scenes = SceneStore::new();
        let t0 = Instant::now();
        scenes.create_scene("482913", t0, TTL);

        let envelope = parse_envelope(&subscribe_xml("482913", "ext_42")).unwrap();
        let (scene_id, identity) = extract_scan(&envelope).unwrap();
        scenes.mark_scanned(&scene_id, &identity, t0);

        let session = scenes.get("482913").unwrap();
        assert_eq!(session.state, SceneState::Scanned);
        assert_eq!(session.external_identity.as_deref(), Some("ext_42"));
    }

    #[test]
    fn resolved_identity_maps_to_one_local_account() {
        let scenes = SceneStore::new();
        let users = UserDirectory::new();
        let t0 = Instant::now();

        // Two separate login attempts by the same external identity.
        for scene_id in ["111111", "222222"] {
            scenes.create_scene(scene_id, t0, TTL);
            let envelope = parse_envelope(&subscribe_xml(scene_id, "ext_42")).unwrap();
            let (sid, identity) = extract_scan(&envelope).unwrap();
            scenes.mark_scanned(&sid, &identity, t0);
        }

        let a = users.resolve_or_create_external(
            scenes.get("111111").unwrap().external_identity.as_deref().unwrap(),
            true,
        );
        let b = users.resolve_or_create_external(
            scenes.get("222222").unwrap().external_identity.as_deref().unwrap(),
            true,
        );
        assert_eq!(a.id, b.id);
        assert_eq!(users.len(), 1);
    }
}
