#[cfg(test)]
pub mod test {
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    use chrono::{DateTime, FixedOffset, Utc};
    use serde::{Deserialize, Serialize};

    use crate::reflect::{Describe, Fields};
    use crate::schema::{self, Schema, WalkOptions};

    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(default)]
    pub struct TestConfig {
        pub meta: Meta,
        pub port: i64,
        pub verbose: bool,
        pub log_level: String,
        pub database: Database,
        pub auth: Option<Auth>,
        pub extra: Extra,
        /// Never bound: the type has no flag form.
        #[serde(skip)]
        pub internal: char,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                meta: Meta::default(),
                port: 8080,
                verbose: false,
                log_level: "info".to_string(),
                database: Database::default(),
                auth: None,
                extra: Extra::default(),
                internal: 'x',
            }
        }
    }

    impl Describe for TestConfig {
        fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
            fields.field("meta", &self.meta).tag("confx", ",squash");
            fields.field("port", &self.port).tag("usage", "Listen port");
            fields.field("verbose", &self.verbose);
            fields
                .field("log_level", &self.log_level)
                .tag("validate", "oneof=debug info warn error");
            fields.field("database", &self.database);
            fields.field("auth", &self.auth);
            fields.field("extra", &self.extra);
            fields.field("internal", &self.internal).tag("confx", "-");
        }
    }

    #[derive(Deserialize, Debug, Default, PartialEq)]
    #[serde(default)]
    pub struct Meta {
        pub name: String,
    }

    impl Describe for Meta {
        fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
            fields.field("name", &self.name);
        }
    }

    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(default)]
    pub struct Database {
        pub host: String,
        pub port: u16,
        pub max_idle_conns: Option<i64>,
    }

    impl Default for Database {
        fn default() -> Self {
            Self {
                host: "localhost".to_string(),
                port: 5432,
                max_idle_conns: None,
            }
        }
    }

    impl Describe for Database {
        fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
            fields
                .field("host", &self.host)
                .tag("usage", "Database host")
                .tag("validate", "required")
                .tag("confz", "address");
            fields.field("port", &self.port);
            fields
                .field("max_idle_conns", &self.max_idle_conns)
                .tag("confx", "maxIdleConns");
        }
    }

    #[derive(Deserialize, Debug, Default, PartialEq)]
    #[serde(default)]
    pub struct Auth {
        pub client_id: String,
    }

    impl Describe for Auth {
        fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
            fields.field("client_id", &self.client_id).tag("confx", "clientId");
        }
    }

    // -- One field per leaf classification ---------------------------------------

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Item {
        pub name: String,
        pub weight: i64,
    }

    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(default)]
    pub struct Extra {
        pub labels: BTreeMap<String, String>,
        pub float64_slice: Vec<f64>,
        pub string_to_int64: HashMap<String, i64>,
        pub timeout: Duration,
        pub blob: Vec<u8>,
        pub created: DateTime<Utc>,
        pub ratio: f32,
        pub tags: Vec<String>,
        pub flags: Vec<bool>,
        pub items: Vec<Item>,
    }

    impl Default for Extra {
        fn default() -> Self {
            Self {
                labels: BTreeMap::from([("env".to_string(), "dev".to_string())]),
                float64_slice: vec![1.1, 2.2],
                string_to_int64: HashMap::new(),
                timeout: Duration::from_secs(5),
                blob: Vec::new(),
                created: DateTime::<Utc>::default(),
                ratio: 0.5,
                tags: Vec::new(),
                flags: Vec::new(),
                items: Vec::new(),
            }
        }
    }

    impl Describe for Extra {
        fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
            fields.field("labels", &self.labels).tag("confx", "labels");
            fields
                .field("float64_slice", &self.float64_slice)
                .tag("confx", "float64Slice");
            fields
                .field("string_to_int64", &self.string_to_int64)
                .tag("confx", "stringToInt64");
            fields.field("timeout", &self.timeout).tag("usage", "Request timeout");
            fields.field("blob", &self.blob);
            fields.field("created", &self.created);
            fields.field("ratio", &self.ratio);
            fields.field("tags", &self.tags);
            fields.field("flags", &self.flags);
            fields.field("items", &self.items);
        }
    }

    /// One field per scalar type and per slice and map element type, with
    /// integer boundaries as defaults.
    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(default)]
    pub struct AllKinds {
        pub enabled: bool,
        pub tiny: i8,
        pub small: i16,
        pub medium: i32,
        pub large: i64,
        pub word: isize,
        pub byte: u8,
        pub short: u16,
        pub unsigned: u32,
        pub huge: u64,
        pub size: usize,
        pub single: f32,
        pub double: f64,
        pub name: String,
        pub wait: Duration,
        pub stamp: DateTime<FixedOffset>,
        pub blob: Vec<u8>,
        pub bools: Vec<bool>,
        pub ints32: Vec<i32>,
        pub ints64: Vec<i64>,
        pub isizes: Vec<isize>,
        pub uints32: Vec<u32>,
        pub uints64: Vec<u64>,
        pub usizes: Vec<usize>,
        pub floats32: Vec<f32>,
        pub floats64: Vec<f64>,
        pub strings: Vec<String>,
        pub waits: Vec<Duration>,
        pub counts: HashMap<String, i32>,
        pub totals: HashMap<String, i64>,
        pub labels: BTreeMap<String, String>,
        pub items: Vec<Item>,
    }

    impl Default for AllKinds {
        fn default() -> Self {
            Self {
                enabled: true,
                tiny: i8::MIN,
                small: i16::MAX,
                medium: i32::MIN,
                large: i64::MIN,
                word: isize::MAX,
                byte: u8::MAX,
                short: u16::MAX,
                unsigned: u32::MAX,
                huge: u64::MAX,
                size: usize::MAX,
                single: 0.1,
                double: -2.5e-3,
                name: "svc".to_string(),
                wait: Duration::from_millis(1_500),
                stamp: DateTime::parse_from_rfc3339("2024-05-06T07:08:09+02:00").unwrap(),
                blob: b"hi".to_vec(),
                bools: vec![true],
                ints32: vec![i32::MIN, i32::MAX],
                ints64: vec![i64::MIN, i64::MAX],
                isizes: vec![-1],
                uints32: vec![u32::MAX],
                uints64: vec![0, u64::MAX],
                usizes: vec![usize::MAX],
                floats32: vec![1.1],
                floats64: vec![2.2],
                strings: vec!["a".to_string()],
                waits: vec![Duration::from_secs(60)],
                counts: HashMap::from([("a".to_string(), i32::MIN)]),
                totals: HashMap::from([("b".to_string(), i64::MAX)]),
                labels: BTreeMap::from([("env".to_string(), "dev".to_string())]),
                items: vec![Item {
                    name: "one".to_string(),
                    weight: 1,
                }],
            }
        }
    }

    impl Describe for AllKinds {
        fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
            fields.field("enabled", &self.enabled);
            fields.field("tiny", &self.tiny);
            fields.field("small", &self.small);
            fields.field("medium", &self.medium);
            fields.field("large", &self.large);
            fields.field("word", &self.word);
            fields.field("byte", &self.byte);
            fields.field("short", &self.short);
            fields.field("unsigned", &self.unsigned);
            fields.field("huge", &self.huge);
            fields.field("size", &self.size);
            fields.field("single", &self.single);
            fields.field("double", &self.double);
            fields.field("name", &self.name);
            fields.field("wait", &self.wait);
            fields.field("stamp", &self.stamp);
            fields.field("blob", &self.blob);
            fields.field("bools", &self.bools);
            fields.field("ints32", &self.ints32);
            fields.field("ints64", &self.ints64);
            fields.field("isizes", &self.isizes);
            fields.field("uints32", &self.uints32);
            fields.field("uints64", &self.uints64);
            fields.field("usizes", &self.usizes);
            fields.field("floats32", &self.floats32);
            fields.field("floats64", &self.floats64);
            fields.field("strings", &self.strings);
            fields.field("waits", &self.waits);
            fields.field("counts", &self.counts);
            fields.field("totals", &self.totals);
            fields.field("labels", &self.labels);
            fields.field("items", &self.items);
        }
    }

    // -- Helpers ----------------------------------------------------------------

    /// Walk with default tags and the given env prefix.
    pub fn schema_for(value: &dyn Describe, prefix: &str) -> Schema {
        schema::walk(value, &WalkOptions::new(prefix)).unwrap()
    }

    pub fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_walks() {
        let schema = schema_for(&TestConfig::default(), "APP_");
        let keys: Vec<&str> = schema.fields().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "name",
                "port",
                "verbose",
                "log_level",
                "database.host",
                "database.port",
                "database.maxIdleConns",
                "auth.clientId",
                "extra.labels",
                "extra.float64Slice",
                "extra.stringToInt64",
                "extra.timeout",
                "extra.blob",
                "extra.created",
                "extra.ratio",
                "extra.tags",
                "extra.flags",
                "extra.items",
            ]
        );
    }
}
