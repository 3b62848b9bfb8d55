use shared_state::{DeviceKey, PortKey, Usage};

/// One analog input on a reader, with the experiments currently using it.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    key: PortKey,
    usage: Usage,
    users: Vec<String>,
}

impl Port {
    pub fn new(device: DeviceKey, position: u8) -> Self {
        Self {
            key: PortKey::new(device, position),
            usage: Usage::Unused,
            users: Vec::new(),
        }
    }

    pub fn key(&self) -> PortKey {
        self.key
    }

    pub fn device(&self) -> DeviceKey {
        self.key.device
    }

    pub fn position(&self) -> u8 {
        self.key.position
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Names of the experiments holding this port.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn is_available(&self) -> bool {
        self.usage == Usage::Unused
    }

    /// Test ports are exclusive; a reference port may be shared by any number
    /// of experiments but never doubles as a test port.
    pub fn can_claim(&self, usage: Usage) -> bool {
        match usage {
            Usage::Test => self.usage == Usage::Unused,
            Usage::Reference => matches!(self.usage, Usage::Unused | Usage::Reference),
            Usage::Unused => false,
        }
    }

    pub(crate) fn claim(&mut self, user: &str, usage: Usage) {
        self.usage = usage;
        if !self.users.iter().any(|u| u == user) {
            self.users.push(user.to_string());
        }
    }

    /// Drops `user`; the port becomes available once nobody holds it.
    pub(crate) fn release(&mut self, user: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u != user);
        if self.users.is_empty() {
            self.usage = Usage::Unused;
        }
        self.users.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.users.clear();
        self.usage = Usage::Unused;
    }
}
