use std::sync::Arc;

use dirstore::core::config::PartitionConfig;
use dirstore::core::error::Result;
use dirstore::core::types::{AliasDerefMode, Entry, Modification, SearchScope};
use dirstore::partition::BTreePartition;
use dirstore::query::ast::Filter;
use dirstore::schema::SchemaRegistry;

fn main() -> Result<()> {
    let config = PartitionConfig {
        suffix_dn: "dc=example,dc=com".to_string(),
        indexed_attributes: vec!["cn".to_string(), "sn".to_string()],
        ..Default::default()
    };
    let partition = BTreePartition::open(Arc::new(SchemaRegistry::new()), config)?;

    partition.add(
        "dc=example,dc=com",
        Entry::new().with_attribute("dc", "example"),
    )?;
    partition.add(
        "ou=people,dc=example,dc=com",
        Entry::new().with_attribute("ou", "people"),
    )?;
    for (cn, sn) in [("Alice", "Smith"), ("Bob", "Baker"), ("Carol", "Smith")] {
        partition.add(
            &format!("cn={},ou=people,dc=example,dc=com", cn),
            Entry::new()
                .with_attribute("objectclass", "person")
                .with_attribute("cn", cn)
                .with_attribute("sn", sn),
        )?;
    }

    println!("{} entries stored", partition.count()?);

    let filter = Filter::and(vec![
        Filter::eq("sn", "Smith"),
        Filter::substring("cn", Some("A"), &[], None),
    ]);
    let mut cursor = partition.search(
        "dc=example,dc=com",
        SearchScope::Subtree,
        AliasDerefMode::Never,
        &filter,
    )?;
    println!("sn=Smith and cn starting with 'A':");
    while cursor.has_more()? {
        let record = cursor.next()?;
        println!("  {}", partition.entry_dn(record.id)?);
    }
    cursor.close()?;

    partition.modify(
        "cn=Bob,ou=people,dc=example,dc=com",
        &[Modification::add("mail", &["bob@example.com"])],
    )?;
    partition.add_index_on("mail")?;

    let mut cursor = partition.search(
        "dc=example,dc=com",
        SearchScope::Subtree,
        AliasDerefMode::Never,
        &Filter::present("mail"),
    )?;
    println!("entries with mail:");
    while cursor.has_more()? {
        let record = cursor.next()?;
        println!("  {}", partition.entry_dn(record.id)?);
    }
    cursor.close()?;

    let stats = partition.stats()?;
    println!(
        "stats: {} entries, {} user indices, {} searches, {} writes",
        stats.entry_count, stats.user_index_count, stats.search_count, stats.write_count
    );
    partition.close()?;
    Ok(())
}
