pub mod csv_points;
