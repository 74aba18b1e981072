pub mod sysinfo_memory_probe;
