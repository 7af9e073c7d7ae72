use std::collections::HashSet;

use rand::Rng;

static CHARACTERS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Random lowercase hex identifiers.
pub struct IdGenerator {
    length: usize,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(32)
    }
}

impl IdGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        let mut id = String::with_capacity(self.length);
        for _ in 0..self.length {
            id.push(CHARACTERS[rng.random_range(0..CHARACTERS.len())]);
        }
        id
    }

    pub fn generate_unique(&self, existing_ids: &HashSet<String>) -> String {
        let mut id = self.generate();
        while existing_ids.contains(&id) {
            id = self.generate();
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_hex_of_requested_length() {
        let id = IdGenerator::default().generate();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn unique_ids_avoid_existing_ones() {
        let generator = IdGenerator::new(1);
        let existing: HashSet<String> = CHARACTERS[..15].iter().map(|c| c.to_string()).collect();
        assert_eq!(generator.generate_unique(&existing), "f");
    }
}
