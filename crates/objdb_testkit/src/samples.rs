//! Sample persisted types and relations shared by tests.

use objdb_core::{
    CoreResult, DictId, FieldDef, FieldKind, Obj, Persist, Record, Relation, RelationTable,
    SecondaryKeyDef, Value,
};

/// A person with an optional reference to a friend.
#[derive(Debug)]
pub struct Person {
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: u32,
    /// Referenced friend, stored by oid.
    pub friend: Option<Obj<Person>>,
}

impl Person {
    /// Creates a person without a friend.
    pub fn named(name: &str, age: u32) -> Obj<Self> {
        Obj::new(Self {
            name: name.to_owned(),
            age,
            friend: None,
        })
    }
}

impl Persist for Person {
    const TYPE_NAME: &'static str = "Person";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("age", FieldKind::U32),
            FieldDef::new("friend", FieldKind::Object),
        ]
    }

    fn create() -> Self {
        Self {
            name: String::new(),
            age: 0,
            friend: None,
        }
    }

    fn save(&self) -> Vec<Value> {
        vec![
            Value::from(self.name.as_str()),
            Value::U32(self.age),
            Value::object(self.friend.as_ref()),
        ]
    }

    fn load(&mut self, record: &mut Record) -> CoreResult<()> {
        self.name = record.take_string("name")?;
        self.age = record.take_u32("age")?;
        self.friend = record.take_object("friend")?;
        Ok(())
    }
}

/// A graph node; `next` may close a cycle.
#[derive(Debug)]
pub struct Node {
    /// Label.
    pub label: String,
    /// Successor.
    pub next: Option<Obj<Node>>,
}

impl Node {
    /// Creates a node without a successor.
    pub fn labeled(label: &str) -> Obj<Self> {
        Obj::new(Self {
            label: label.to_owned(),
            next: None,
        })
    }

    /// Builds `a -> b -> a` and returns `a`.
    pub fn cycle(a: &str, b: &str) -> Obj<Self> {
        let first = Self::labeled(a);
        let second = Self::labeled(b);
        second.borrow_mut().next = Some(first.clone());
        first.borrow_mut().next = Some(second);
        first
    }
}

impl Persist for Node {
    const TYPE_NAME: &'static str = "Node";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("label", FieldKind::String),
            FieldDef::new("next", FieldKind::Object),
        ]
    }

    fn create() -> Self {
        Self {
            label: String::new(),
            next: None,
        }
    }

    fn save(&self) -> Vec<Value> {
        vec![
            Value::from(self.label.as_str()),
            Value::object(self.next.as_ref()),
        ]
    }

    fn load(&mut self, record: &mut Record) -> CoreResult<()> {
        self.label = record.take_string("label")?;
        self.next = record.take_object("next")?;
        Ok(())
    }
}

/// Application settings, used as a singleton.
#[derive(Debug, Default)]
pub struct Settings {
    /// UI theme.
    pub theme: String,
    /// Number of times the application started.
    pub launches: u64,
}

impl Persist for Settings {
    const TYPE_NAME: &'static str = "Settings";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("theme", FieldKind::String),
            FieldDef::new("launches", FieldKind::U64),
        ]
    }

    fn create() -> Self {
        Self::default()
    }

    fn save(&self) -> Vec<Value> {
        vec![Value::from(self.theme.as_str()), Value::U64(self.launches)]
    }

    fn load(&mut self, record: &mut Record) -> CoreResult<()> {
        self.theme = record.take_string("theme")?;
        self.launches = record.take_u64("launches")?;
        Ok(())
    }
}

/// First layout of the `Employee` table.
#[derive(Debug, Default)]
pub struct EmployeeV1 {
    /// Name.
    pub name: String,
    /// Salary in whole units.
    pub salary: u32,
    /// Dropped in the second layout.
    pub nickname: String,
}

impl Persist for EmployeeV1 {
    const TYPE_NAME: &'static str = "Employee";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("salary", FieldKind::U32),
            FieldDef::new("nickname", FieldKind::String),
        ]
    }

    fn create() -> Self {
        Self::default()
    }

    fn save(&self) -> Vec<Value> {
        vec![
            Value::from(self.name.as_str()),
            Value::U32(self.salary),
            Value::from(self.nickname.as_str()),
        ]
    }

    fn load(&mut self, record: &mut Record) -> CoreResult<()> {
        self.name = record.take_string("name")?;
        self.salary = record.take_u32("salary")?;
        self.nickname = record.take_string("nickname")?;
        Ok(())
    }
}

/// Second layout of the `Employee` table: `salary` widened, `nickname`
/// dropped, `rating` added with an initializer.
#[derive(Debug, Default)]
pub struct EmployeeV2 {
    /// Name.
    pub name: String,
    /// Salary, widened to 64 bits.
    pub salary: u64,
    /// Performance rating, 5 for rows written before it existed.
    pub rating: u32,
}

impl Persist for EmployeeV2 {
    const TYPE_NAME: &'static str = "Employee";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("salary", FieldKind::U64),
            FieldDef::new("rating", FieldKind::U32).with_init(|| Value::U32(5)),
        ]
    }

    fn create() -> Self {
        Self::default()
    }

    fn save(&self) -> Vec<Value> {
        vec![
            Value::from(self.name.as_str()),
            Value::U64(self.salary),
            Value::U32(self.rating),
        ]
    }

    fn load(&mut self, record: &mut Record) -> CoreResult<()> {
        self.name = record.take_string("name")?;
        self.salary = record.take_u64("salary")?;
        self.rating = record.take_u32("rating")?;
        Ok(())
    }
}

/// A job posting keyed by company and number, with a nested dictionary of
/// tags and a secondary key on the title.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Company, first primary key field.
    pub company: String,
    /// Posting number, second primary key field.
    pub number: u64,
    /// Title, indexed by `by_title`.
    pub title: String,
    /// Yearly salary.
    pub salary: i64,
    /// Handle of the nested tag dictionary.
    pub tags: DictId,
}

impl Job {
    /// Creates a job whose tag dictionary is `tags`.
    pub fn new(company: &str, number: u64, title: &str, salary: i64, tags: DictId) -> Self {
        Self {
            company: company.to_owned(),
            number,
            title: title.to_owned(),
            salary,
            tags,
        }
    }

    /// Primary key values for `find_by_key` and `remove_by_key`.
    pub fn key_of(company: &str, number: u64) -> Vec<Value> {
        vec![Value::from(company), Value::U64(number)]
    }
}

impl Relation for Job {
    const NAME: &'static str = "Job";

    fn primary_key() -> Vec<FieldDef> {
        vec![
            FieldDef::new("company", FieldKind::String),
            FieldDef::new("number", FieldKind::U64),
        ]
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("title", FieldKind::String),
            FieldDef::new("salary", FieldKind::I64),
            FieldDef::new("tags", FieldKind::Dictionary),
        ]
    }

    fn secondary_keys() -> Vec<SecondaryKeyDef> {
        vec![SecondaryKeyDef::new("by_title", 1, &["title"])]
    }

    fn key(&self) -> Vec<Value> {
        Self::key_of(&self.company, self.number)
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::from(self.title.as_str()),
            Value::I64(self.salary),
            Value::Dictionary(self.tags),
        ]
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Ok(Self {
            company: record.take_string("company")?,
            number: record.take_u64("number")?,
            title: record.take_string("title")?,
            salary: record.take_i64("salary")?,
            tags: record.take_dictionary("tags")?,
        })
    }
}

/// A plain relation keyed by a signed integer, for ordering tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Primary key.
    pub at: i64,
    /// Measured value.
    pub value: f64,
}

impl Reading {
    /// Creates a reading.
    pub fn new(at: i64, value: f64) -> Self {
        Self { at, value }
    }
}

impl Relation for Reading {
    const NAME: &'static str = "Reading";

    fn primary_key() -> Vec<FieldDef> {
        vec![FieldDef::new("at", FieldKind::I64)]
    }

    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::new("value", FieldKind::F64)]
    }

    fn key(&self) -> Vec<Value> {
        vec![Value::I64(self.at)]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::F64(self.value)]
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Ok(Self {
            at: record.take_i64("at")?,
            value: record.take_f64("value")?,
        })
    }
}

/// A relation whose rows carry a whole object graph inline.
#[derive(Debug)]
pub struct Snapshot {
    /// Primary key.
    pub id: u64,
    /// Root of the inline graph.
    pub root: Option<Obj<Node>>,
}

impl Relation for Snapshot {
    const NAME: &'static str = "Snapshot";

    fn primary_key() -> Vec<FieldDef> {
        vec![FieldDef::new("id", FieldKind::U64)]
    }

    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::new("root", FieldKind::Object)]
    }

    fn key(&self) -> Vec<Value> {
        vec![Value::U64(self.id)]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::object(self.root.as_ref())]
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Ok(Self {
            id: record.take_u64("id")?,
            root: record.take_object("root")?,
        })
    }
}

/// A relation seeded with one row by its creation hook.
#[derive(Debug, Clone, PartialEq)]
pub struct Currency {
    /// ISO code.
    pub code: String,
    /// Minor units per major unit.
    pub minor_units: u32,
}

impl Relation for Currency {
    const NAME: &'static str = "Currency";

    fn primary_key() -> Vec<FieldDef> {
        vec![FieldDef::new("code", FieldKind::String)]
    }

    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::new("minor_units", FieldKind::U32)]
    }

    fn key(&self) -> Vec<Value> {
        vec![Value::from(self.code.as_str())]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::U32(self.minor_units)]
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Ok(Self {
            code: record.take_string("code")?,
            minor_units: record.take_u32("minor_units")?,
        })
    }

    fn on_create(table: &RelationTable<'_, Self>) -> CoreResult<()> {
        table.insert(&Self {
            code: "EUR".to_owned(),
            minor_units: 100,
        })
    }
}
