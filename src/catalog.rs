//! Typed views over the cheat-code schema.
//!
//! Every function here is a thin layer on [`QueryClient::exec`]: one
//! statement, then row mapping into the domain types the callers consume.
//! Lookups that can miss return `Ok(None)` rather than an error; an absent
//! game is an ordinary answer, not a failure.

use std::collections::{BTreeMap, HashMap};

use crate::error::QueryError;
use crate::query_facade::QueryClient;
use crate::query_worker::ScalarValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct System {
    pub id: i64,
    pub name: String,
}

/// A system group with the total number of games carried by its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemListItem {
    pub id: i64,
    pub name: String,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameListItem {
    /// Database row id, unique across all systems.
    pub uid: i64,
    /// The game's public id, shared between releases on different devices.
    pub id: i64,
    pub name: String,
    pub version: Option<String>,
    pub system: System,
    pub device: Device,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub id: i64,
    pub name: String,
    pub note: Option<String>,
    pub code: String,
    pub author: Option<Author>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: i64,
    pub name: String,
    pub codes: Vec<Code>,
}

/// Codes for one game: the sectionless ones first, then every named
/// section in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodesList {
    pub codes: Vec<Code>,
    pub sections: Vec<Section>,
}

/// Name of one system row, `None` when the id is unknown.
pub async fn get_system_name(
    client: &QueryClient,
    id: i64,
) -> Result<Option<String>, QueryError> {
    let rows = client
        .exec(
            "select name from systems where id = ?",
            vec![ScalarValue::Integer(id)],
        )
        .await?;
    match rows.first() {
        Some(row) => Ok(Some(row.text("name")?.to_string())),
        None => Ok(None),
    }
}

/// Name of one game row, `None` when the uid is unknown.
pub async fn get_game_name(client: &QueryClient, uid: i64) -> Result<Option<String>, QueryError> {
    let rows = client
        .exec(
            "select name from games where id = ?",
            vec![ScalarValue::Integer(uid)],
        )
        .await?;
    match rows.first() {
        Some(row) => Ok(Some(row.text("name")?.to_string())),
        None => Ok(None),
    }
}

/// All system groups, each with its game count rolled up over the group's
/// member systems, ordered by name then id.
pub async fn get_systems(client: &QueryClient) -> Result<Vec<SystemListItem>, QueryError> {
    let rows = client
        .exec(
            "\
  select s1.id, min(s1.name) as name, sum(s2.qty) as qty
  from systems s1
  join systems s2 on s2.group_id = s1.id
  where s1.id in (select distinct group_id from systems)
  group by s1.id
  order by name, s1.id
",
            vec![],
        )
        .await?;

    let mut systems = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        systems.push(SystemListItem {
            id: row.integer("id")?,
            name: row.text("name")?.to_string(),
            qty: row.integer("qty")?,
        });
    }
    Ok(systems)
}

/// Games available under a system group, one entry per database row,
/// ordered by name, id, device name, device id.
///
/// Only games with at least one code (`qty > 0`) are listed.
pub async fn get_games(
    client: &QueryClient,
    system_id: i64,
) -> Result<Vec<GameListItem>, QueryError> {
    let rows = client
        .exec(
            "\
    select s.id      as system_id,
           s.name    as system_name,
           g.id      as game_uid,
           g.game_id as game_id,
           g.name    as game_name,
           g.version as game_version,
           g.qty     as game_qty,
           d.id      as device_id,
           d.name    as device_name
    from games g
    join systems s on s.id = g.system_id
    join devices d on d.id = g.device_id
    where g.qty > 0 and g.system_id in (select id from systems where group_id = ?)
    order by g.name, g.version, g.id, s.name, d.name, d.id
",
            vec![ScalarValue::Integer(system_id)],
        )
        .await?;

    let mut devices: HashMap<i64, Device> = HashMap::new();
    let mut systems: HashMap<i64, System> = HashMap::new();
    let mut games: BTreeMap<i64, GameListItem> = BTreeMap::new();

    for row in rows.iter() {
        let device_id = row.integer("device_id")?;
        if !devices.contains_key(&device_id) {
            devices.insert(
                device_id,
                Device {
                    id: device_id,
                    name: row.text("device_name")?.to_string(),
                },
            );
        }

        let system_id = row.integer("system_id")?;
        if !systems.contains_key(&system_id) {
            systems.insert(
                system_id,
                System {
                    id: system_id,
                    name: row.text("system_name")?.to_string(),
                },
            );
        }

        let uid = row.integer("game_uid")?;
        if !games.contains_key(&uid) {
            games.insert(
                uid,
                GameListItem {
                    uid,
                    id: row.integer("game_id")?,
                    name: row.text("game_name")?.to_string(),
                    version: row.optional_text("game_version")?.map(str::to_string),
                    system: systems[&system_id].clone(),
                    device: devices[&device_id].clone(),
                    qty: row.integer("game_qty")?,
                },
            );
        }
    }

    let mut out: Vec<GameListItem> = games.into_values().collect();
    out.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.device.name.cmp(&b.device.name))
            .then_with(|| a.device.id.cmp(&b.device.id))
    });
    Ok(out)
}

/// The full codes listing for one game.
///
/// Codes without a section land in `codes`; the rest are grouped under
/// their section, with codes in id order inside each group and sections in
/// ascending id order. Author records are deduplicated across codes.
pub async fn get_codes_list(
    client: &QueryClient,
    game_uid: i64,
) -> Result<CodesList, QueryError> {
    let rows = client
        .exec(
            "\
    select s.id     as section_id,
           s.name   as section_name,
           c.id      as code_id,
           c.name    as code_name,
           c.note    as code_note,
           c.code    as code_code,
           a.id      as author_id,
           a.name    as author_name
    from codes c
    left join sections s on s.id = c.section_id
    left join authors a on a.id = c.author_id
    where c.game_uid = ?
    order by c.id
",
            vec![ScalarValue::Integer(game_uid)],
        )
        .await?;

    let mut codes: Vec<Code> = Vec::new();
    let mut sections: BTreeMap<i64, Section> = BTreeMap::new();
    let mut authors: HashMap<i64, Author> = HashMap::new();

    for row in rows.iter() {
        let author = match row.optional_integer("author_id")? {
            Some(author_id) => {
                if !authors.contains_key(&author_id) {
                    authors.insert(
                        author_id,
                        Author {
                            id: author_id,
                            name: row.text("author_name")?.to_string(),
                        },
                    );
                }
                Some(authors[&author_id].clone())
            }
            None => None,
        };

        let code = Code {
            id: row.integer("code_id")?,
            name: row.text("code_name")?.to_string(),
            note: row.optional_text("code_note")?.map(str::to_string),
            code: row.text("code_code")?.to_string(),
            author,
        };

        match row.optional_integer("section_id")? {
            Some(section_id) => {
                if !sections.contains_key(&section_id) {
                    sections.insert(
                        section_id,
                        Section {
                            id: section_id,
                            name: row.text("section_name")?.to_string(),
                            codes: Vec::new(),
                        },
                    );
                }
                if let Some(section) = sections.get_mut(&section_id) {
                    section.codes.push(code);
                }
            }
            None => codes.push(code),
        }
    }

    Ok(CodesList {
        codes,
        sections: sections.into_values().collect(),
    })
}
