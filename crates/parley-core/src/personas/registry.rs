use super::persona::Persona;
use crate::messages::PersonalityKey;

/// Read-only lookup from personality key to display name and greeting.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl PersonaRegistry {
    pub fn new(personas: Vec<Persona>) -> Self {
        let mut registry = Self { personas: Vec::new() };
        for persona in personas {
            registry.insert(persona);
        }
        registry
    }

    /// The two personas every install has.
    pub fn builtin() -> Self {
        Self::new(vec![
            Persona::builtin(
                "mentor",
                "Mentor",
                "Hi, I'm your mentor. What would you like to work through today?",
                "Patient, long-horizon advice.",
            ),
            Persona::builtin(
                "analyst",
                "Analyst",
                "Analyst here. Send me the numbers and I'll take a look.",
                "Terse, numbers-first answers.",
            ),
        ])
    }

    /// Built-ins overlaid with whatever `Persona::discover` finds on disk.
    pub fn load() -> Self {
        let mut registry = Self::builtin();
        for persona in Persona::discover() {
            registry.insert(persona);
        }
        registry
    }

    /// Insert or replace by key.
    pub fn insert(&mut self, persona: Persona) {
        match self.personas.iter_mut().find(|p| p.key == persona.key) {
            Some(existing) => *existing = persona,
            None => self.personas.push(persona),
        }
    }

    pub fn get(&self, key: &PersonalityKey) -> Option<&Persona> {
        self.personas.iter().find(|p| &p.key == key)
    }

    pub fn contains(&self, key: &PersonalityKey) -> bool {
        self.get(key).is_some()
    }

    pub fn display_name(&self, key: &PersonalityKey) -> Option<&str> {
        self.get(key).map(|p| p.display_name.as_str())
    }

    pub fn greeting(&self, key: &PersonalityKey) -> Option<&str> {
        self.get(key).map(|p| p.greeting.as_str())
    }

    pub fn all(&self) -> &[Persona] {
        &self.personas
    }

    /// First registered persona. The session falls back to it when the
    /// configured default is not installed.
    pub fn first(&self) -> Option<&Persona> {
        self.personas.first()
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
