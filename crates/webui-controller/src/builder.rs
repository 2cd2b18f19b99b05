//! Desired state builder: maps a `WebUi` to the children it implies.
//!
//! Pure and total: every well-formed `WebUi` yields exactly one workload and
//! one content store, both named by [`child_key`]. The port, mount path and
//! labels are fixed for every instance.

use std::collections::BTreeMap;

use webui_state::*;

/// Prefix joining a parent's name to its children's names.
pub const CHILD_PREFIX: &str = "webui-";

/// File the page payload is stored under.
pub const INDEX_FILE: &str = "index.html";

pub const CONTAINER_NAME: &str = "webui";
pub const HTTP_PORT_NAME: &str = "http";
pub const HTTP_PORT: u16 = 80;
pub const CONTENT_VOLUME: &str = "contents";
pub const CONTENT_MOUNT_PATH: &str = "/usr/share/nginx/html";

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "webui";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "webui-controller";

/// The two children of a `WebUi`, in their target shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredChildren {
    pub workload: Workload,
    pub content_store: ContentStore,
}

/// Identity shared by both children of `parent`.
pub fn child_key(parent: &ObjectKey) -> ObjectKey {
    ObjectKey::new(
        parent.namespace.clone(),
        format!("{CHILD_PREFIX}{}", parent.name),
    )
}

/// Inverse of [`child_key`]. `None` if `child` doesn't carry the prefix.
pub fn parent_key(child: &ObjectKey) -> Option<ObjectKey> {
    child
        .name
        .strip_prefix(CHILD_PREFIX)
        .filter(|name| !name.is_empty())
        .map(|name| ObjectKey::new(child.namespace.clone(), name))
}

/// Whether an object carries the label this controller stamps on its children.
pub fn is_managed(meta: &ObjectMeta) -> bool {
    meta.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
}

/// Build the target workload and content store for `webui`.
pub fn build(webui: &WebUi) -> DesiredChildren {
    let key = child_key(&webui.key());
    DesiredChildren {
        workload: build_workload(&key, &webui.spec),
        content_store: build_content_store(&key, &webui.spec),
    }
}

fn build_content_store(key: &ObjectKey, spec: &WebUiSpec) -> ContentStore {
    ContentStore {
        metadata: child_meta(key),
        data: BTreeMap::from([(INDEX_FILE.to_string(), spec.contents.clone())]),
    }
}

fn build_workload(key: &ObjectKey, spec: &WebUiSpec) -> Workload {
    Workload {
        metadata: child_meta(key),
        spec: WorkloadSpec {
            replicas: spec.replicas,
            selector: app_labels(),
            template: InstanceTemplate {
                labels: app_labels(),
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: spec.image.clone(),
                    ports: vec![ContainerPort {
                        name: HTTP_PORT_NAME.to_string(),
                        protocol: Protocol::Tcp,
                        container_port: HTTP_PORT,
                    }],
                    volume_mounts: vec![VolumeMount {
                        name: CONTENT_VOLUME.to_string(),
                        mount_path: CONTENT_MOUNT_PATH.to_string(),
                    }],
                }],
                volumes: vec![Volume {
                    name: CONTENT_VOLUME.to_string(),
                    source: VolumeSource::ContentStore {
                        name: key.name.clone(),
                    },
                }],
            },
        },
    }
}

fn child_meta(key: &ObjectKey) -> ObjectMeta {
    let mut meta = ObjectMeta::new(key.namespace.clone(), key.name.clone());
    meta.labels = app_labels();
    meta.labels
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    meta
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), APP_LABEL_VALUE.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webui(contents: &str, image: &str, replicas: u32) -> WebUi {
        WebUi::new(
            "x",
            "a",
            WebUiSpec {
                contents: contents.to_string(),
                image: image.to_string(),
                replicas,
            },
        )
    }

    #[test]
    fn content_store_holds_the_payload_as_index_html() {
        let children = build(&webui("<h1>hi</h1>", "nginx:1", 2));
        let store = &children.content_store;

        assert_eq!(store.metadata.key(), ObjectKey::new("x", "webui-a"));
        assert_eq!(store.data.len(), 1);
        assert_eq!(store.data.get(INDEX_FILE).map(String::as_str), Some("<h1>hi</h1>"));
    }

    #[test]
    fn workload_mirrors_image_and_replicas() {
        let children = build(&webui("<h1>hi</h1>", "nginx:1", 2));
        let workload = &children.workload;

        assert_eq!(workload.metadata.key(), ObjectKey::new("x", "webui-a"));
        assert_eq!(workload.image(), Some("nginx:1"));
        assert_eq!(workload.spec.replicas, 2);
        assert_eq!(workload.content_ref(), Some(ObjectKey::new("x", "webui-a")));
    }

    #[test]
    fn workload_carries_fixed_port_and_mount() {
        let children = build(&webui("", "nginx:1", 0));
        let container = &children.workload.spec.template.containers[0];

        assert_eq!(container.name, CONTAINER_NAME);
        assert_eq!(
            container.ports,
            vec![ContainerPort {
                name: "http".to_string(),
                protocol: Protocol::Tcp,
                container_port: 80,
            }]
        );
        assert_eq!(container.volume_mounts[0].mount_path, CONTENT_MOUNT_PATH);
        assert_eq!(container.volume_mounts[0].name, CONTENT_VOLUME);
    }

    #[test]
    fn selector_matches_template_labels() {
        let children = build(&webui("", "nginx:1", 1));
        let spec = &children.workload.spec;
        assert_eq!(spec.selector, spec.template.labels);
        assert_eq!(spec.selector.get(APP_LABEL).map(String::as_str), Some("webui"));
    }

    #[test]
    fn children_are_marked_managed() {
        let children = build(&webui("", "nginx:1", 1));
        assert!(is_managed(&children.workload.metadata));
        assert!(is_managed(&children.content_store.metadata));
        assert!(!is_managed(&ObjectMeta::new("x", "other")));
    }

    #[test]
    fn build_is_deterministic() {
        let parent = webui("<p>same</p>", "nginx:1", 3);
        assert_eq!(build(&parent), build(&parent));
    }

    #[test]
    fn child_and_parent_keys_round_trip() {
        let parent = ObjectKey::new("ns", "site");
        let child = child_key(&parent);
        assert_eq!(child, ObjectKey::new("ns", "webui-site"));
        assert_eq!(parent_key(&child), Some(parent));
    }

    #[test]
    fn distinct_parents_get_distinct_children() {
        let a = child_key(&ObjectKey::new("ns", "a"));
        let b = child_key(&ObjectKey::new("ns", "b"));
        let other_ns = child_key(&ObjectKey::new("other", "a"));
        assert_ne!(a, b);
        assert_ne!(a, other_ns);
    }

    #[test]
    fn parent_key_rejects_foreign_names() {
        assert_eq!(parent_key(&ObjectKey::new("ns", "nginx")), None);
        assert_eq!(parent_key(&ObjectKey::new("ns", "webui-")), None);
    }
}
