//! Store commands. Each writes its human-readable result to `out`.

use anyhow::{bail, Context};
use quire_model::{Entry, EntryId, MetaPatch, Scope};
use quire_replica::Watermarks;
use quire_store::{AddOptions, AddOutcome, Cursor, IndexSelector, LogStore, PageQuery};
use serde_json::Value;
use std::io::Write;

pub fn add(
    store: &LogStore,
    content: &str,
    scope: Option<Scope>,
    out: &mut impl Write,
) -> anyhow::Result<EntryId> {
    let content: Value = serde_json::from_str(content)
        .context("content must be JSON (quote plain text, e.g. '\"hello\"')")?;
    let options = scope.map(AddOptions::scoped).unwrap_or_default();
    let metadata = match store.add(content, options)? {
        AddOutcome::Added(metadata) => metadata,
        AddOutcome::AlreadyExists(conflict) => bail!("add conflicted: {conflict:?}"),
    };
    writeln!(out, "{}  {}", metadata.id, metadata.body.seq)?;
    Ok(metadata.id)
}

pub fn show(store: &LogStore, id: &EntryId, out: &mut impl Write) -> anyhow::Result<()> {
    let Some(entry) = store.by_id(id)? else {
        bail!("no entry {id}");
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&entry)?)?;
    Ok(())
}

pub struct ListArgs {
    pub scope: Option<Scope>,
    pub limit: usize,
    pub ascending: bool,
    /// Hex cursor printed by a previous page.
    pub after: Option<String>,
}

pub fn list(store: &LogStore, args: ListArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let index = match args.scope {
        Some(scope) => IndexSelector::Scope(scope),
        None => IndexSelector::Seq,
    };
    let mut query = PageQuery::new(index).limit(args.limit);
    if args.ascending {
        query = query.ascending();
    }
    if let Some(after) = args.after {
        let bytes = hex::decode(after.trim()).context("cursor must be hex")?;
        query = query.after(Cursor::from_bytes(bytes));
    }

    let page = store.page(&query)?;
    for entry in &page.entries {
        writeln!(out, "{}", summary(entry))?;
    }
    if let Some(next) = page.next {
        writeln!(out, "-- more: --after {}", hex::encode(next.as_bytes()))?;
    }
    Ok(())
}

pub fn remove(store: &LogStore, id: &EntryId, out: &mut impl Write) -> anyhow::Result<()> {
    match store.remove(id)? {
        Some(entry) => writeln!(out, "removed {}  {}", entry.id(), entry.metadata.body.seq)?,
        None => bail!("no entry {id}"),
    }
    Ok(())
}

pub fn rescope(
    store: &LogStore,
    id: &EntryId,
    scope: Scope,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if !store.change_meta(id, &MetaPatch::rescope(scope.clone()))? {
        bail!("no entry {id}");
    }
    writeln!(out, "{id}  scope={scope}")?;
    Ok(())
}

pub fn status(store: &LogStore, out: &mut impl Write) -> anyhow::Result<()> {
    let watermarks = Watermarks {
        last_added: store.last_added()?,
        last_synced: store.last_synced()?,
    };
    writeln!(out, "device:     {}", store.device())?;
    writeln!(out, "author:     {}", store.identity().author())?;
    writeln!(out, "entries:    {}", store.len()?)?;
    writeln!(out, "lastAdded:  {}", describe(&watermarks.last_added))?;
    writeln!(out, "lastSynced: {}", describe(&watermarks.last_synced))?;
    writeln!(out, "pending:    {}", watermarks.pending())?;
    let heads = store.heads()?;
    if !heads.is_empty() {
        writeln!(out, "heads:")?;
        for (device, local_seq) in heads {
            writeln!(out, "  {:<16} {local_seq}", device.as_str())?;
        }
    }
    Ok(())
}

fn describe(watermark: &Option<quire_model::Watermark>) -> String {
    match watermark {
        Some(w) => format!("{}  {}", w.seq, w.id),
        None => "-".to_string(),
    }
}

fn summary(entry: &Entry) -> String {
    format!(
        "{}  {:<24} {:<10} {}",
        entry.id(),
        entry.metadata.body.seq.to_string(),
        entry.effective_scope().as_str(),
        entry.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_model::{DeviceName, NodeIdentity, StorageConfig};
    use quire_store::LogIdentity;

    fn store() -> LogStore {
        let identity = LogIdentity::signing(
            DeviceName::new("phone").unwrap(),
            NodeIdentity::from_seed([2; 32]),
        );
        LogStore::open(&StorageConfig::InMemory, identity).unwrap()
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn add_show_remove() {
        let store = store();
        let mut out = Vec::new();
        let id = add(&store, r#"{"text":"hi"}"#, None, &mut out).unwrap();
        assert!(text(out).starts_with(&id.to_string()));

        let mut out = Vec::new();
        show(&store, &id, &mut out).unwrap();
        let shown: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(shown["content"]["text"], "hi");

        remove(&store, &id, &mut Vec::new()).unwrap();
        assert!(show(&store, &id, &mut Vec::new()).is_err());
        assert!(remove(&store, &id, &mut Vec::new()).is_err());
    }

    #[test]
    fn add_rejects_non_json() {
        let store = store();
        assert!(add(&store, "not json", None, &mut Vec::new()).is_err());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn list_pages_with_cursor() {
        let store = store();
        for n in 0..3 {
            add(&store, &n.to_string(), None, &mut Vec::new()).unwrap();
        }

        let mut out = Vec::new();
        let args = ListArgs {
            scope: None,
            limit: 2,
            ascending: true,
            after: None,
        };
        list(&store, args, &mut out).unwrap();
        let first = text(out);
        let lines: Vec<_> = first.lines().collect();
        assert_eq!(lines.len(), 3);
        let cursor = lines[2].rsplit(' ').next().unwrap().to_string();

        let mut out = Vec::new();
        let args = ListArgs {
            scope: None,
            limit: 2,
            ascending: true,
            after: Some(cursor),
        };
        list(&store, args, &mut out).unwrap();
        let second = text(out);
        assert_eq!(second.lines().count(), 1);
        assert!(second.contains("phone#2@"));
    }

    #[test]
    fn rescope_moves_entry_between_scopes() {
        let store = store();
        let id = add(&store, "1", None, &mut Vec::new()).unwrap();
        rescope(&store, &id, Scope::new("work").unwrap(), &mut Vec::new()).unwrap();

        let mut out = Vec::new();
        let args = ListArgs {
            scope: Some(Scope::new("work").unwrap()),
            limit: 10,
            ascending: false,
            after: None,
        };
        list(&store, args, &mut out).unwrap();
        assert!(text(out).contains(&id.to_string()));
    }

    #[test]
    fn status_reports_pending() {
        let store = store();
        add(&store, "1", None, &mut Vec::new()).unwrap();
        add(&store, "2", None, &mut Vec::new()).unwrap();
        let mut out = Vec::new();
        status(&store, &mut out).unwrap();
        let report = text(out);
        assert!(report.contains("entries:    2"));
        assert!(report.contains("pending:    2"));
        assert!(report.contains("lastSynced: -"));
    }
}
