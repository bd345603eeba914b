//! Process-wide plugin registry.
//!
//! Plugins registered here are instantiated once per [`DlClient`] when the client is built
//! and can later be fetched by their path with [`DlClient::plugin`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use crate::client::DlClient;

pub type PluginInstance = Arc<dyn Any + Send + Sync>;
pub type PluginFactory = Arc<dyn Fn(&DlClient) -> PluginInstance + Send + Sync>;

static PLUGINS: LazyLock<Mutex<Vec<(String, PluginFactory)>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

fn plugins_guard() -> MutexGuard<'static, Vec<(String, PluginFactory)>> {
    PLUGINS.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Registers `factory` under `path`. Clients built afterwards get an instance.
///
/// Registering the same path twice keeps both entries; the later one wins on lookup.
/// Instances are owned by their client: a plugin that stores a `DlClient` clone keeps the
/// client alive forever. Store [`DlClient::downgrade`] instead.
pub fn register_plugin<T, F>(path: impl Into<String>, factory: F)
where
    T: Any + Send + Sync,
    F: Fn(&DlClient) -> T + Send + Sync + 'static,
{
    let factory: PluginFactory = Arc::new(move |client| Arc::new(factory(client)));
    plugins_guard().push((path.into(), factory));
}

pub(crate) fn instantiate_plugins(client: &DlClient) -> HashMap<String, PluginInstance> {
    let factories: Vec<_> = plugins_guard().clone();
    factories
        .into_iter()
        .map(|(path, factory)| {
            let instance = factory(client);
            (path, instance)
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn clear_plugins() {
    plugins_guard().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WeakDlClient;
    use crate::test_support::{start_mock_server, test_client};

    struct Greeter {
        app_id: String,
        client: WeakDlClient,
    }

    #[test]
    fn clients_receive_registered_plugins() {
        clear_plugins();
        register_plugin("greeter", |client: &DlClient| Greeter {
            app_id: client.app_id().to_string(),
            client: client.downgrade(),
        });

        let server = start_mock_server();
        let client = test_client(&server);
        let greeter = client.plugin::<Greeter>("greeter").unwrap();
        assert_eq!(greeter.app_id, "1");
        assert_eq!(greeter.client.upgrade().unwrap().app_id(), "1");
        assert!(client.plugin::<String>("greeter").is_none());
        assert!(client.plugin::<Greeter>("missing").is_none());
        clear_plugins();

        // The plugin's handle does not keep the client alive.
        drop(client);
        assert!(greeter.client.upgrade().is_none());
    }
}
