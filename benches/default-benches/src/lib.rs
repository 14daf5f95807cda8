use common::bench::BenchmarkRegistry;

/// Registers every built-in benchmark type
pub fn register_benches(registry: &mut BenchmarkRegistry) -> &mut BenchmarkRegistry {
    registry.register(cmd::KIND, cmd::Cmd::build)
}

pub fn default_registry() -> BenchmarkRegistry {
    let mut registry = BenchmarkRegistry::new();
    register_benches(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use common::config::BenchmarkConfig;
    use serde_json::json;

    use super::*;

    #[test]
    fn builds_cmd_benchmarks() {
        let registry = default_registry();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), ["cmd"]);

        let config = BenchmarkConfig {
            kind: "cmd".to_owned(),
            attributes: json!({"command": ["true"]}).as_object().cloned().unwrap(),
        };
        let bench = registry.build(&config).unwrap();
        assert_eq!(bench.execution_matrix().unwrap().len(), 1);
    }
}
