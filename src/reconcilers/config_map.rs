use std::collections::BTreeMap;

use indoc::formatdoc;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Resource as _, ResourceExt as _};

use super::{Dependent, FieldPolicy, TrackedField};
use crate::{labels, meta, resources::WebApp};

/// Key under which the rendered page is stored
pub const HTML_KEY: &str = "index.html";

const CONTENT: TrackedField = TrackedField {
    name: "content",
    policy: FieldPolicy::PatchInPlace,
};

/// Owns the ConfigMap holding the page served by the web server
pub(crate) struct ConfigMapSync;

impl ConfigMapSync {
    /// Render the served page for this WebApp.
    ///
    /// The message is user-authored text placed into the markup verbatim.
    fn render(webapp: &WebApp) -> String {
        let message = &webapp.spec.message;
        let name = webapp.name_any();

        formatdoc! {r#"
            <!DOCTYPE html>
            <html>
            <head><title>{message}</title></head>
            <body>
              <h1>{message}</h1>
              <p>Managed by the <strong>WebApp Operator</strong> | Instance: <strong>{name}</strong></p>
            </body>
            </html>"#}
    }

    fn content(config_map: &ConfigMap) -> Option<&String> {
        config_map.data.as_ref().and_then(|data| data.get(HTML_KEY))
    }
}

impl Dependent for ConfigMapSync {
    type Object = ConfigMap;

    const KIND: &'static str = "ConfigMap";

    fn name(&self, webapp: &WebApp) -> String {
        webapp.prefixed_name("html")
    }

    fn desired(&self, webapp: &WebApp) -> ConfigMap {
        let owner = webapp.controller_owner_ref(&()).unwrap();

        ConfigMap {
            metadata: meta! {
                owners: vec![owner],
                name: Some(self.name(webapp)),
                labels: Some(labels! { instance: webapp.name_any() })
            },
            data: Some(BTreeMap::from([(HTML_KEY.into(), Self::render(webapp))])),

            binary_data: None,
            immutable: None,
        }
    }

    fn drift(&self, current: &ConfigMap, desired: &ConfigMap) -> Vec<TrackedField> {
        if Self::content(current) != Self::content(desired) {
            vec![CONTENT]
        } else {
            vec![]
        }
    }

    fn overlay(&self, current: &mut ConfigMap, desired: &ConfigMap) {
        current.data = desired.data.clone();
    }
}
