use serde::Serialize;

/// What this node advertises to the registry on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationRecord {
    pub url: String,
    pub name: String,
    pub tag: String,
    pub zalo: String,
    pub phone: String,
    pub email: String,
    pub contact_name: String,
    pub facebook: String,
}

impl RegistrationRecord {
    /// Query parameters in the order the registry expects them.
    pub fn query_pairs(&self) -> [(&'static str, &str); 8] {
        [
            ("url", self.url.as_str()),
            ("name", self.name.as_str()),
            ("tag", self.tag.as_str()),
            ("zalo", self.zalo.as_str()),
            ("phone", self.phone.as_str()),
            ("email", self.email.as_str()),
            ("contact_name", self.contact_name.as_str()),
            ("facebook", self.facebook.as_str()),
        ]
    }
}
