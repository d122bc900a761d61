//! Aligned feature table example using the rowbase library.
use std::sync::Arc;

use rayon::prelude::*;
use rowbase::columnar::{
    AnyDataType, DataType, DataTypeRef, Float64Type, Int32Type, MultiFileRow, MultiFileSchema, ObjectType, Row, RowValues, Schema,
    SchemaOptions, StorageOptions,
};
use rowbase::utils::metrics;

/// A feature detected in one raw file.
#[derive(Debug)]
struct Feature {
    mz: f64,
    rt: f64,
    height: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().try_init();

    println!("rowbase Feature Table Example");
    println!("=============================");

    let files = vec!["blank.mzML".to_string(), "qc_1.mzML".to_string(), "qc_2.mzML".to_string()];
    let options = SchemaOptions::new()
        .initial_capacity(1000)
        .increment(1000)
        .storage(StorageOptions::mapped(1 << 16));
    let table: Arc<MultiFileSchema<String, Arc<Feature>>> = Arc::new(Schema::multi_file(files.clone(), options)?);

    table.add_listener(Arc::new(|added: &[DataTypeRef], _: &[DataTypeRef]| {
        for data_type in added {
            println!("  new column: {:?}", data_type);
        }
    }));

    let mz = Float64Type::new("mz");
    let rt = Float64Type::new("rt");
    let charge = Int32Type::new("charge");
    let annotation = ObjectType::<String>::new("annotation");

    println!("\nRegistering columns...");
    table.add_data_type(&mz)?;
    table.add_data_type(&rt)?;

    println!("\nAligning features on the rayon pool...");
    let rows: Vec<MultiFileRow<String, Arc<Feature>>> = (0..5000)
        .into_par_iter()
        .map(|i| -> rowbase::Result<_> {
            let row = Row::new(&table)?;
            let center = 100.0 + i as f64 * 0.1;
            row.set(&mz, center)?;
            row.set(&rt, (i % 600) as f64)?;
            for (k, file) in files.iter().enumerate() {
                if (i + k) % 3 != 0 {
                    row.set_feature(
                        file,
                        Arc::new(Feature {
                            mz: center + k as f64 * 1e-4,
                            rt: (i % 600) as f64 + 0.01 * k as f64,
                            height: 1e4 * (k + 1) as f64,
                        }),
                    );
                }
            }
            Ok(row)
        })
        .collect::<rowbase::Result<_>>()?;

    println!("\nAnnotating the first rows...");
    for row in rows.iter().filter(|row| row.index() < 3) {
        row.put_all(
            RowValues::new()
                .with(&charge, 1)
                .with(&annotation, format!("[M+H]+ #{}", row.index())),
        )?;
    }

    let row = &rows[0];
    println!("\nRow {}:", row.index());
    for (data_type, value) in row.stream() {
        if let Some(v) = value.downcast_ref::<f64>() {
            println!("  {} = {}", data_type.name(), v);
        } else if let Some(v) = value.downcast_ref::<i32>() {
            println!("  {} = {}", data_type.name(), v);
        } else if let Some(v) = value.downcast_ref::<String>() {
            println!("  {} = {}", data_type.name(), v);
        }
    }
    for (file, feature) in row.features() {
        println!(
            "  {}: mz {:.4}, rt {:.2}, height {:.0}",
            file, feature.mz, feature.rt, feature.height
        );
    }

    let stats = table.stats();
    println!("\nTable statistics:");
    println!("  rows:          {}", stats.rows_issued);
    println!("  column length: {}", stats.column_length);
    println!("  columns:       {}", stats.column_count);
    println!("  growths:       {}", stats.growths);
    println!("  {} slots per file", table.feature_slots_len(&files[0]).unwrap_or(0));

    let store = metrics::get_stats();
    println!("\nStore statistics:");
    println!("  column resizes:     {}", store.column_resizes);
    println!("  optimistic retries: {}", store.optimistic_retries);
    println!("  mapped bytes:       {}", store.bytes_mapped);
    println!("  charge unique id:   {}", charge.unique_id());

    Ok(())
}
