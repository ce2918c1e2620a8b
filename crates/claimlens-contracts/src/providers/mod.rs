use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

/// Known inference providers with exactly one marked active.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: IndexMap<String, ProviderSpec>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(vec![
            ProviderSpec {
                id: "openai".to_string(),
                name: "OpenAI".to_string(),
                is_active: true,
            },
            ProviderSpec {
                id: "anthropic".to_string(),
                name: "Anthropic".to_string(),
                is_active: false,
            },
            ProviderSpec {
                id: "dryrun".to_string(),
                name: "Dry run".to_string(),
                is_active: false,
            },
        ])
    }
}

impl ProviderRegistry {
    /// Keeps input order. If no entry (or more than one) is active, the
    /// first active one wins, falling back to the first entry.
    pub fn new(providers: Vec<ProviderSpec>) -> Self {
        let active_id = providers
            .iter()
            .find(|provider| provider.is_active)
            .or_else(|| providers.first())
            .map(|provider| provider.id.clone());
        let providers = providers
            .into_iter()
            .map(|mut provider| {
                provider.is_active = active_id.as_deref() == Some(provider.id.as_str());
                (provider.id.clone(), provider)
            })
            .collect();
        Self { providers }
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids = self.providers.keys().cloned().collect::<Vec<String>>();
        ids.sort();
        ids
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }

    pub fn active(&self) -> Option<&ProviderSpec> {
        self.providers.values().find(|provider| provider.is_active)
    }

    pub fn set_active(&mut self, id: &str) -> Result<(), String> {
        if !self.providers.contains_key(id) {
            return Err(format!("Unknown provider '{id}'."));
        }
        for provider in self.providers.values_mut() {
            provider.is_active = provider.id == id;
        }
        log::info!("PROVIDER_ACTIVATED provider={id}");
        Ok(())
    }
}
