//! Intent classification: maps a free-text message to topic flags.
//!
//! Classification is pure substring containment against the lower-cased message.
//! There is no tokenization or stemming, so short triggers such as `ip` or `ram`
//! also fire inside longer words. Keyword sets cover the Spanish phrasing the
//! relay was first deployed with plus English equivalents.

mod gate;

pub use gate::{evaluate_gate, GateDecision, BYPASS_PHRASES};

use serde::Serialize;

/// Sensitive topic a message may reference. `Topic::ALL` is also the section order of the context blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Host CPU / RAM / disk / OS.
    Hardware,
    /// Cloud instance metadata.
    Cloud,
    /// Temporary cloud credentials.
    Credentials,
    /// Network security rules attached to this instance.
    NetworkRules,
    /// Other compute instances in the account.
    Peers,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Hardware,
        Topic::Cloud,
        Topic::Credentials,
        Topic::NetworkRules,
        Topic::Peers,
    ];

    /// Trigger phrases for this topic. Matching is case-insensitive substring containment.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Topic::Hardware => &[
                "cpu",
                "ram",
                "memoria",
                "disco",
                "sistema",
                "especificaciones",
                "servidor",
                "recursos",
                "memory",
                "disk",
                "system",
                "specs",
                "server",
                "resources",
            ],
            Topic::Cloud => &[
                "aws",
                "región",
                "region",
                "ip",
                "instancia",
                "instance",
                "ec2",
                "vpc",
                "subnet",
                "ami",
            ],
            Topic::Credentials => &[
                "iam",
                "rol",
                "credencial",
                "credential",
                "access",
                "token",
                "secret",
                "key",
            ],
            Topic::NetworkRules => &["security", "grupo", "firewall", "reglas", "rules"],
            Topic::Peers => &[
                "instancias",
                "servidores",
                "otras",
                "cuenta",
                "lista",
                "instances",
                "servers",
                "account",
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Hardware => "hardware",
            Topic::Cloud => "cloud",
            Topic::Credentials => "credentials",
            Topic::NetworkRules => "network_rules",
            Topic::Peers => "peers",
        }
    }
}

/// Independent topic flags derived once per message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TopicFlags {
    pub hardware: bool,
    pub cloud: bool,
    pub credentials: bool,
    pub peers: bool,
    pub network_rules: bool,
}

impl TopicFlags {
    pub fn get(&self, topic: Topic) -> bool {
        match topic {
            Topic::Hardware => self.hardware,
            Topic::Cloud => self.cloud,
            Topic::Credentials => self.credentials,
            Topic::Peers => self.peers,
            Topic::NetworkRules => self.network_rules,
        }
    }

    fn set(&mut self, topic: Topic) {
        match topic {
            Topic::Hardware => self.hardware = true,
            Topic::Cloud => self.cloud = true,
            Topic::Credentials => self.credentials = true,
            Topic::Peers => self.peers = true,
            Topic::NetworkRules => self.network_rules = true,
        }
    }

    /// True when at least one topic is requested.
    pub fn any(&self) -> bool {
        Topic::ALL.iter().any(|t| self.get(*t))
    }

    /// Requested topics in section order.
    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        Topic::ALL.into_iter().filter(move |t| self.get(*t))
    }
}

/// Classifies a message into topic flags. Empty input yields all flags false.
pub fn classify(message: &str) -> TopicFlags {
    let lowered = message.to_lowercase();
    let mut flags = TopicFlags::default();
    for topic in Topic::ALL {
        if topic.keywords().iter().any(|kw| lowered.contains(kw)) {
            flags.set(topic);
        }
    }
    flags
}
