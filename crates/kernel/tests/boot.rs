//! 从空盘启动内核，经进程接口走一遍文件与内存映射，再重启验证持久化

use std::sync::Arc;

use device::RamDisk;
use fs::{FsConfig, SECTOR_SIZE};
use kernel::{Kernel, KernelConfig};
use mm::{PAGE_SIZE, VmConfig};
use test_support::pattern;

fn config(format: bool) -> KernelConfig {
    KernelConfig {
        fs: FsConfig::default(),
        vm: VmConfig {
            user_stack_top: 0x8000_0000,
            max_stack_size: 16 * PAGE_SIZE,
            frame_limit: 3,
        },
        format,
    }
}

fn boot(disk: &Arc<RamDisk>, format: bool) -> Arc<Kernel> {
    let swap = RamDisk::new(32 * 8, 512, 1);
    Kernel::boot(config(format), disk.clone(), swap).unwrap()
}

#[test]
fn files_and_mappings_survive_reboot() {
    let disk = RamDisk::new(1024, SECTOR_SIZE, 0);
    let data: Vec<u8> = pattern(5000, 3).collect();
    let map_at = 0x2000_0000;

    {
        let kernel = boot(&disk, true);
        let mut init = kernel.spawn().unwrap();
        init.mkdir("/a").unwrap();
        init.create("/a/b", 0).unwrap();
        let fd = init.open("/a/b").unwrap();
        assert_eq!(init.write(fd, &data).unwrap(), 5000);

        let names = kernel.fs().root().unwrap().entries().unwrap();
        assert_eq!(names, [".", "..", "a"]);

        // 通过映射改写第二页，再用匿名页制造换出压力
        init.mmap(fd, map_at, 5000, true, 0).unwrap();
        init.write_user(map_at + PAGE_SIZE, b"mapped").unwrap();
        init.map_anon(0x3000_0000, 4 * PAGE_SIZE, true).unwrap();
        init.write_user(0x3000_0000, &vec![9u8; 4 * PAGE_SIZE]).unwrap();
        init.exit(0);

        kernel.shutdown().unwrap();
    }

    let kernel = boot(&disk, false);
    let mut init = kernel.spawn().unwrap();
    let fd = init.open("a/b").unwrap();
    let mut back = vec![0u8; 5000];
    assert_eq!(init.read(fd, &mut back).unwrap(), 5000);
    assert_eq!(&back[PAGE_SIZE..PAGE_SIZE + 6], b"mapped");
    assert_eq!(&back[..PAGE_SIZE], &data[..PAGE_SIZE]);
    assert_eq!(&back[PAGE_SIZE + 6..], &data[PAGE_SIZE + 6..]);
}
